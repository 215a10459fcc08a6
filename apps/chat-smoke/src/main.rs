mod bridge;
mod config;
mod logging;
mod seed;
mod viewport;

use std::{sync::Arc, time::Duration};

use bridge::{SnapshotCallback, ViewBridge};
use chat_core::{Attachment, AttachmentKind, ChatViewSnapshot, DeleteScope};
use chat_runtime::{RuntimeConfig, spawn_runtime};
use chat_store::{InMemoryDocumentStore, InMemoryObjectStore};
use config::SmokeConfig;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use viewport::FixedRowViewport;

const ROW_HEIGHT: f64 = 48.0;
const VIEWPORT_HEIGHT: f64 = 640.0;
const STEP_TIMEOUT: Duration = Duration::from_secs(10);
const SMOKE_REACTION: &str = "❤️";
// 1x1 transparent PNG.
const SMOKE_IMAGE: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

#[tokio::main]
async fn main() {
    logging::init();
    info!("starting chat-smoke");

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load configuration: {err}");
            std::process::exit(1);
        }
    };
    debug!(?config, "loaded smoke configuration");

    if let Err(err) = run(config).await {
        error!(error = %err, "smoke session failed");
        eprintln!("chat-smoke failed: {err}");
        std::process::exit(1);
    }
}

async fn run(config: SmokeConfig) -> Result<(), String> {
    let documents = Arc::new(InMemoryDocumentStore::new());
    let objects = Arc::new(InMemoryObjectStore::new(config.object_base_url.clone()));

    let chat_id = seed::seed_conversation(
        documents.as_ref(),
        &config.me,
        &config.peer,
        config.seed_messages,
    )
    .await
    .map_err(|err| format!("seeding conversation failed: {err}"))?;

    let runtime = spawn_runtime(
        RuntimeConfig {
            me: config.me.clone(),
            command_buffer: config.command_buffer,
            event_buffer: config.event_buffer,
        },
        documents,
        objects,
    );

    let (snapshot_tx, mut snapshots) = watch::channel::<Option<ChatViewSnapshot>>(None);
    let on_snapshot: SnapshotCallback = Arc::new(move |snapshot: ChatViewSnapshot| {
        snapshot_tx.send_replace(Some(snapshot));
    });
    let bridge = ViewBridge::spawn(
        &config.me.uid,
        config.window,
        runtime,
        Box::new(FixedRowViewport::new(ROW_HEIGHT, VIEWPORT_HEIGHT)),
        on_snapshot,
    );

    bridge.load_directory();
    bridge.load_chat_list();
    let listed = wait_for_snapshot(&mut snapshots, "directory and chat list", |snapshot| {
        !snapshot.directory.is_empty() && !snapshot.chats.is_empty()
    })
    .await?;
    info!(
        users = listed.directory.len(),
        chats = listed.chats.len(),
        "directory and chat list loaded"
    );

    bridge.select_user(config.peer.clone());
    let expected_rows = config.seed_messages.min(config.window.page_size);
    let opened = wait_for_snapshot(&mut snapshots, "first page", |snapshot| {
        snapshot.chat_id.as_deref() == Some(chat_id.as_str())
            && snapshot.messages.len() == expected_rows
    })
    .await?;
    info!(
        %chat_id,
        rows = opened.messages.len(),
        has_older = opened.has_older,
        "conversation opened"
    );

    bridge.scroll_to(0.0);
    if bridge.on_scrolled().await {
        let metrics = bridge.viewport_metrics();
        info!(
            rows = bridge.snapshot().messages.len(),
            scroll_top = metrics.scroll_top,
            scroll_height = metrics.scroll_height,
            "older history revealed"
        );
    } else {
        info!("no older history to reveal");
    }

    let peer_message = opened
        .messages
        .iter()
        .rev()
        .find(|row| !row.is_own)
        .map(|row| row.message.id.clone());
    if let Some(message_id) = &peer_message {
        bridge.reply_to(message_id);
    }

    let greeting = format!("Hello {} from chat-smoke", config.peer.display_name);
    bridge.set_compose_text(greeting.clone());
    if !bridge.submit() {
        return Err("compose draft was not submitted".to_owned());
    }
    let sent = wait_for_snapshot(&mut snapshots, "sent message", |snapshot| {
        snapshot.compose_text.is_empty()
            && snapshot.messages.last().is_some_and(|row| {
                row.is_own && row.message.text.as_deref() == Some(greeting.as_str())
            })
    })
    .await?;
    let sent_id = sent
        .messages
        .last()
        .map(|row| row.message.id.clone())
        .ok_or_else(|| "sent message missing from snapshot".to_owned())?;
    info!(message_id = %sent_id, rows = sent.messages.len(), "message sent");

    if bridge.start_edit(&sent_id) {
        let edited_text = format!("{greeting} (edited)");
        bridge.set_compose_text(edited_text.clone());
        bridge.submit();
        wait_for_snapshot(&mut snapshots, "edit", |snapshot| {
            snapshot.messages.iter().any(|row| {
                row.message.id == sent_id
                    && row.message.is_edited()
                    && row.message.text.as_deref() == Some(edited_text.as_str())
            })
        })
        .await?;
        info!(message_id = %sent_id, "message edited");
    }

    match peer_message {
        Some(message_id) if bridge.react(&message_id, SMOKE_REACTION) => {
            let me = config.me.uid.clone();
            wait_for_snapshot(&mut snapshots, "reaction", |snapshot| {
                snapshot.messages.iter().any(|row| {
                    row.message.id == message_id
                        && row.message.reaction_of(&me) == Some(SMOKE_REACTION)
                })
            })
            .await?;
            info!(%message_id, "reaction applied");
        }
        _ => warn!("no peer message available to react to"),
    }

    bridge.attach(Attachment {
        kind: AttachmentKind::Image,
        content_type: "image/png".to_owned(),
        data: SMOKE_IMAGE.to_vec(),
    });
    bridge.submit();
    let with_image = wait_for_snapshot(&mut snapshots, "image message", |snapshot| {
        !snapshot.has_attachment
            && snapshot
                .messages
                .last()
                .is_some_and(|row| row.is_own && row.message.img.is_some())
    })
    .await?;
    if let Some(row) = with_image.messages.last() {
        info!(img = ?row.message.img, "image message sent");
    }

    if let Some(oldest) = with_image.messages.first().map(|row| row.message.id.clone())
        && bridge.delete(&oldest, DeleteScope::ForMe)
    {
        wait_for_snapshot(&mut snapshots, "delete for me", |snapshot| {
            snapshot.messages.iter().all(|row| row.message.id != oldest)
        })
        .await?;
        info!(message_id = %oldest, "message hidden for me");
    }

    bridge.cancel_compose();
    bridge.dismiss_notice();

    let summary = bridge.snapshot();
    println!(
        "chat {} with {}: {} rows rendered, older history pending: {}",
        summary.chat_id.as_deref().unwrap_or("-"),
        config.peer.display_name,
        summary.messages.len(),
        summary.has_older
    );
    if let Some(last) = summary.messages.last() {
        println!(
            "last message from {}: {}",
            last.message.sender,
            last.message.text.as_deref().unwrap_or("<attachment>")
        );
    }

    bridge.close_conversation();
    info!("chat-smoke finished");
    Ok(())
}

async fn wait_for_snapshot<F>(
    snapshots: &mut watch::Receiver<Option<ChatViewSnapshot>>,
    step: &str,
    mut done: F,
) -> Result<ChatViewSnapshot, String>
where
    F: FnMut(&ChatViewSnapshot) -> bool,
{
    let waited = tokio::time::timeout(
        STEP_TIMEOUT,
        snapshots.wait_for(|snapshot| snapshot.as_ref().is_some_and(&mut done)),
    )
    .await
    .map_err(|_| format!("timed out waiting for {step}"))?
    .map_err(|_| format!("snapshot channel closed while waiting for {step}"))?;

    waited
        .as_ref()
        .cloned()
        .ok_or_else(|| format!("missing snapshot after {step}"))
}
