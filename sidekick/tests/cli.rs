use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use sidekick_core::model::{LocalRecord, LocalValue, POST, SUBSCRIBER};
use sidekick_core::store::{self, LocalBlock, OwnerRef, Store};
use std::fs::write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Writes a config pointing the database and media root into `dir`.
fn write_config(dir: &Path) -> PathBuf {
    let path = dir.join("sidekick.yaml");
    let yaml = format!(
        "database: {db}\nmedia_root: {media}\nmedia_url: https://cdn.example.com/\nnotion:\n  databases:\n    - collection: newsletter.Post\n      database_id: posts-db\n",
        db = dir.join("sidekick.sqlite3").display(),
        media = dir.join("media").display(),
    );
    write(&path, yaml).expect("Writing temp config failed");
    path
}

/// The binary, run from `dir` so no stray `.env` is picked up, without a key.
fn sidekick(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("sidekick").expect("Binary exists");
    cmd.current_dir(dir).env_remove("NOTION_API_KEY");
    cmd
}

#[test]
fn help_lists_every_command() {
    let dir = TempDir::new().unwrap();
    sidekick(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("sync")
                .and(predicate::str::contains("push"))
                .and(predicate::str::contains("render"))
                .and(predicate::str::contains("add-subscriber"))
                .and(predicate::str::contains("add-user")),
        );
}

#[test]
fn add_subscriber_locally_then_render_rejects_it() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    sidekick(dir.path())
        .args(["add-subscriber", "--email", "reader@example.com", "--name", "Ada"])
        .args(["--exclude-tag", "politics", "--local-only", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("subscriber 1 created"));

    let store = Store::open(dir.path().join("sidekick.sqlite3")).unwrap();
    let record = store.load_record(&SUBSCRIBER, 1).unwrap();
    assert_eq!(record.text("email"), Some("reader@example.com"));
    assert_eq!(
        record.get("excluded_tags"),
        &LocalValue::Names(vec!["politics".to_string()])
    );

    sidekick(dir.path())
        .args(["render", "--collection", "newsletter.Subscriber", "--pk", "1", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("has no content blocks"));
}

#[test]
fn add_subscriber_with_invalid_email_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    sidekick(dir.path())
        .args(["add-subscriber", "--email", "not-an-email", "--local-only", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("email"));
}

#[test]
fn render_prints_stored_blocks() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    let store = Store::open(dir.path().join("sidekick.sqlite3")).unwrap();
    let mut post = LocalRecord::new(None);
    post.set("title", LocalValue::Text("Hello".into()));
    post.set("slug", LocalValue::Text("hello".into()));
    post.set("status", LocalValue::Text("published".into()));
    let pk = store::save_record(store.conn(), &POST, &mut post).unwrap();
    let owner = OwnerRef::new(&POST, pk);
    for (ordering, (block_type, properties)) in [
        ("heading_1", json!({ "text": "Welcome", "children": [] })),
        ("image", json!({ "alt": "", "src": "newsletter/1/cat.jpg" })),
    ]
    .into_iter()
    .enumerate()
    {
        let mut block = LocalBlock {
            id: None,
            owner_type: owner.owner_type.to_string(),
            owner_id: owner.owner_id,
            notion_id: uuid::Uuid::new_v4(),
            ordering: ordering as i64,
            block_type: block_type.to_string(),
            properties,
        };
        store::save_block(store.conn(), &mut block).unwrap();
    }
    drop(store);

    sidekick(dir.path())
        .args(["render", "--collection", "newsletter.Post", "--pk"])
        .arg(pk.to_string())
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("<div class=\"heading-1-block\"><h1>Welcome</h1></div>").and(
                predicate::str::contains("https://cdn.example.com/newsletter/1/cat.jpg"),
            ),
        );
}

#[test]
fn render_unknown_record_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    sidekick(dir.path())
        .args(["render", "--collection", "newsletter.Post", "--pk", "7", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn commands_that_reach_notion_need_the_api_key() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    sidekick(dir.path())
        .args(["push", "--collection", "newsletter.Post", "--pk", "1", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("NOTION_API_KEY"));
}

#[test]
fn add_user_registers_an_author() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path());

    sidekick(dir.path())
        .args(["add-user", "--email", "ada@example.com", "--name", "Ada Lovelace", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("user 1 created"));

    let store = Store::open(dir.path().join("sidekick.sqlite3")).unwrap();
    assert_eq!(store.find_user_by_email("ADA@example.com").unwrap(), Some(1));
}

use std::sync::{Arc, Mutex};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use sidekick::cli::{run, Cli, Commands};

    // The config path does not exist, so the command fails after tracing starts.
    let cli = Cli {
        command: Commands::Sync {
            config: PathBuf::from("dummy.yaml"),
            collection: None,
        },
    };

    assert!(run(cli).await.is_err());

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
