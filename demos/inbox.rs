use anyhow::{Context, Result};
use droidscrape::query::{content_desc, find_all, find_first, index_eq, resource_id, text_contains};
use droidscrape::{AdbBridge, Bridge, Controller, ControllerConfig, Node};
use tracing::info;
use tracing_subscriber::EnvFilter;

const PACKAGE: &str = "com.snapchat.android";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let profile = std::env::args().nth(1).unwrap_or_else(|| "satibot".to_string());
    let cfg = ControllerConfig::new("snapchat", profile);
    let bridge = AdbBridge::new(cfg.adb.clone());
    let mut ctl = Controller::open(bridge, cfg)?;
    ctl.set_current_package(PACKAGE);
    info!(battery = %ctl.battery().await?, "device connected");

    ctl.change_menu("Home", 1800).await?;
    let chat_button = ctl
        .find_node(content_desc("Chat"))
        .await?
        .context("chat button not on screen")?;
    ctl.tap_node(&chat_button).await?;
    ctl.change_menu("Chat", 60).await?;

    let tree = ctl.tree().await?;
    let rows = find_all(tree.nodes(), resource_id("com.snapchat.android:id/ff_item"));
    // The first row is the pinned assistant chat.
    let mut unread = Vec::new();
    for row in rows.into_iter().skip(1) {
        let scope = tree.subtree(row);
        let Some(name) = find_first(scope, index_eq(2)).and_then(Node::text) else {
            continue;
        };
        let is_new = find_first(scope, index_eq(4)).is_some_and(|status| text_contains("New")(status));
        if is_new {
            unread.push((name.to_string(), row.clone()));
        }
    }
    info!(count = unread.len(), "unread chats");

    for (peer, row) in unread {
        ctl.tap_node(&row).await?;
        let history = ctl.sync_conversation(&peer).await?;
        println!("{}", serde_json::to_string_pretty(&history)?);
        ctl.bridge().execute(&["input", "keyevent", "KEYCODE_BACK"]).await?;
    }

    Ok(())
}
