//! Offline demo: in-memory backend with one simulated colleague.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;

use crate::models::{NewMessage, Profile, ReceiptKey, Role, TypingBeacon};
use crate::store::memory::InMemoryBackend;
use crate::store::{FeedEvent, MessageStore, RealtimeFeed, ReceiptStore};

pub const DEMO_USER: &str = "demo-user";
const PEER: &str = "demo-bruno";
const PEER_NAME: &str = "Bruno Costa";

const PEER_LINES: &[&str] = &[
    "Alguém revisa a matéria da câmara antes das 18h?",
    "Fotos do porto já estão na pasta.",
    "Fechando a capa, me avisem se mudar algo.",
    "Valeu!",
];

/// Running demo. Dropping it stops the simulated colleague.
pub struct Demo {
    pub backend: InMemoryBackend,
    peer: JoinHandle<()>,
}

impl Drop for Demo {
    fn drop(&mut self) {
        self.peer.abort();
        let stats = self.backend.stats();
        tracing::info!(
            "Demo ended: {} history fetches ({} receipt fetches), {} sends, {} uploads, {} receipt writes, {} subscriptions",
            stats.message_fetches,
            stats.receipt_fetches,
            stats.inserts,
            stats.uploads,
            stats.upserts,
            stats.subscriptions
        );
    }
}

fn profile(id: &str, name: &str, role: Role) -> Profile {
    Profile {
        id: id.to_string(),
        name: Some(name.to_string()),
        avatar_url: None,
        role,
    }
}

/// Seed the newsroom and start the colleague.
pub fn start(role: Role) -> Demo {
    let backend = InMemoryBackend::new();
    backend.add_profile(profile(DEMO_USER, "Você", role));
    backend.add_profile(profile(PEER, PEER_NAME, Role::Admin));
    backend.add_profile(profile("demo-rita", "Rita Alves", Role::Supporter));

    backend.seed_message("demo-rita", "Bom dia! Pauta de hoje no quadro.");
    backend.seed_message(PEER, "Entrevista com o prefeito confirmada para as 15h.");
    backend.sign_in_as(DEMO_USER);

    let peer = tokio::spawn(run_peer(backend.clone()));
    Demo { backend, peer }
}

/// Reads everything you send and posts a line every few seconds.
async fn run_peer(backend: InMemoryBackend) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = backend.subscribe(tx);
    let presence = subscription.presence();
    let mut lines = PEER_LINES.iter().cycle();

    let mut ticker = time::interval(Duration::from_secs(15));
    ticker.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let FeedEvent::MessageInserted(message) = event else { continue };
                if message.user_id == PEER {
                    continue;
                }
                time::sleep(Duration::from_millis(800)).await;
                let key = ReceiptKey {
                    message_id: message.id,
                    user_id: PEER.to_string(),
                };
                if let Err(e) = backend.upsert_ignore_duplicates(&[key]).await {
                    tracing::debug!("Demo receipt failed: {:#}", e);
                }
            }
            _ = ticker.tick() => {
                let Some(line) = lines.next() else { break };
                let beacon = |is_typing| TypingBeacon {
                    is_typing,
                    user_id: PEER.to_string(),
                    user_name: PEER_NAME.to_string(),
                };
                let _ = presence.track(&beacon(true)).await;
                time::sleep(Duration::from_secs(2)).await;
                let _ = presence.track(&beacon(false)).await;
                if let Err(e) = backend.insert(&NewMessage::text(PEER, line)).await {
                    tracing::debug!("Demo message failed: {:#}", e);
                }
            }
        }
    }
}
