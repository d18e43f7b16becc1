//! Composer input buffer with a character cursor.

/// Text being typed in the chat panel.
#[derive(Debug, Default, Clone)]
pub struct Composer {
    input: String,
    /// Cursor position in characters, not bytes.
    cursor: usize,
}

impl Composer {
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_blank(&self) -> bool {
        self.input.trim().is_empty()
    }

    /// Text that would be sent, or None if blank.
    pub fn sendable(&self) -> Option<String> {
        let text = self.input.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    pub fn insert_char(&mut self, c: char) {
        let at = self.byte_offset(self.cursor);
        self.input.insert(at, c);
        self.cursor += 1;
    }

    #[cfg(test)]
    pub fn insert_str(&mut self, s: &str) {
        for c in s.chars() {
            self.insert_char(c);
        }
    }

    /// Delete the character before the cursor.
    pub fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let end = self.byte_offset(self.cursor);
        let start = self.byte_offset(self.cursor - 1);
        self.input.drain(start..end);
        self.cursor -= 1;
    }

    /// Delete the character under the cursor.
    pub fn delete(&mut self) {
        if self.cursor >= self.input.chars().count() {
            return;
        }
        let start = self.byte_offset(self.cursor);
        let end = self.byte_offset(self.cursor + 1);
        self.input.drain(start..end);
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.input.chars().count());
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.input.chars().count();
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.cursor = 0;
    }

    /// Clear only if the buffer still holds `sent`. Text typed after a send
    /// was issued survives that send's confirmation.
    pub fn clear_if_sent(&mut self, sent: &str) -> bool {
        if self.input.trim() == sent {
            self.clear();
            true
        } else {
            false
        }
    }

    fn byte_offset(&self, char_pos: usize) -> usize {
        self.input
            .char_indices()
            .nth(char_pos)
            .map(|(i, _)| i)
            .unwrap_or(self.input.len())
    }
}
