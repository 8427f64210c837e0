//! CLI Integration Tests
//!
//! These tests verify the CLI commands work correctly end-to-end.
//! They test the "wiring" between the CLI and the core library, and never
//! talk to a real relay.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// ============================================================================
// Test Utilities
// ============================================================================

/// Create a CLI command with a temporary data directory
fn cli_cmd(data_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("notesync").expect("Failed to find notesync binary");
    cmd.arg("--data-dir").arg(data_dir.path());
    cmd
}

/// Extract an ID from CLI output (assumes format: "  ID: <id>")
fn extract_id(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("  ID: "))
        .map(|id| id.trim().to_string())
}

fn run(data_dir: &TempDir, args: &[&str]) -> String {
    let output = cli_cmd(data_dir).args(args).output().unwrap();
    assert!(
        output.status.success(),
        "command {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

fn add_note(data_dir: &TempDir, title: &str, content: &str) -> String {
    let output = run(data_dir, &["note", "add", title, content]);
    extract_id(&output).expect("note id in output")
}

/// Remove the default relays so nothing can reach the network
fn remove_all_relays(data_dir: &TempDir) {
    for relay in ["wss://relay.damus.io", "wss://nos.lol"] {
        run(data_dir, &["relay", "remove", relay]);
    }
}

// ============================================================================
// Info Command Tests
// ============================================================================

#[test]
fn test_info_command() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .arg("info")
        .assert()
        .success()
        .stdout(predicate::str::contains("notesync"))
        .stdout(predicate::str::contains("Identity:"))
        .stdout(predicate::str::contains("(not logged in)"))
        .stdout(predicate::str::contains("Last synced: never"));
}

#[test]
fn test_info_creates_config_file() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir).arg("info").assert().success();
    assert!(data_dir.path().join("notesync.toml").exists());
}

// ============================================================================
// Identity Command Tests
// ============================================================================

#[test]
fn test_identity_generate_and_show() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["identity", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Not logged in."));

    let output = run(&data_dir, &["identity", "generate"]);
    assert!(output.contains("Identity created."));

    cli_cmd(&data_dir)
        .args(["identity", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Public key:"));
}

#[test]
fn test_identity_generate_requires_force_to_replace() {
    let data_dir = TempDir::new().unwrap();
    run(&data_dir, &["identity", "generate"]);
    let secret = run(&data_dir, &["identity", "export"]);

    cli_cmd(&data_dir)
        .args(["identity", "generate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--force"));
    assert_eq!(run(&data_dir, &["identity", "export"]), secret);

    run(&data_dir, &["identity", "generate", "--force"]);
    assert_ne!(run(&data_dir, &["identity", "export"]), secret);
}

#[test]
fn test_identity_export_import_roundtrip() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();

    run(&first, &["identity", "generate"]);
    let secret = run(&first, &["identity", "export"]);
    let shown = run(&first, &["identity", "show"]);

    run(&second, &["identity", "import", secret.trim()]);
    assert_eq!(run(&second, &["identity", "show"]), shown);
}

#[test]
fn test_identity_import_rejects_garbage() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["identity", "import", "zz-not-hex"])
        .assert()
        .failure();
}

#[test]
fn test_identity_logout() {
    let data_dir = TempDir::new().unwrap();
    run(&data_dir, &["identity", "generate"]);

    cli_cmd(&data_dir)
        .args(["identity", "logout"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Logged out."));

    cli_cmd(&data_dir)
        .args(["identity", "export"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not logged in"));
}

// ============================================================================
// Note Command Tests
// ============================================================================

#[test]
fn test_note_add_and_list() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["note", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No notes yet."));

    let id = add_note(&data_dir, "Groceries", "milk, eggs");

    cli_cmd(&data_dir)
        .args(["note", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Notes (1):"))
        .stdout(predicate::str::contains(id.as_str()))
        .stdout(predicate::str::contains("Groceries"));
}

#[test]
fn test_note_show_with_tags_and_values() {
    let data_dir = TempDir::new().unwrap();
    let output = run(
        &data_dir,
        &[
            "note", "add", "Trip", "pack light", "--tag", "travel", "--tag", "summer", "--value",
            "country=Norway",
        ],
    );
    let id = extract_id(&output).unwrap();

    cli_cmd(&data_dir)
        .args(["note", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Trip"))
        .stdout(predicate::str::contains("Tags: travel, summer"))
        .stdout(predicate::str::contains("country: Norway"))
        .stdout(predicate::str::contains("pack light"));
}

#[test]
fn test_note_add_rejects_bad_value() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["note", "add", "T", "C", "--value", "no-equals-sign"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected key=value"));
}

#[test]
fn test_note_edit() {
    let data_dir = TempDir::new().unwrap();
    let id = add_note(&data_dir, "Draft", "first");

    run(&data_dir, &["note", "edit", &id, "--content", "second"]);

    cli_cmd(&data_dir)
        .args(["note", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("second"))
        .stdout(predicate::str::contains("first").not());

    cli_cmd(&data_dir)
        .args(["note", "edit", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Nothing to change"));
}

#[test]
fn test_note_delete() {
    let data_dir = TempDir::new().unwrap();
    let id = add_note(&data_dir, "Temp", "gone soon");

    cli_cmd(&data_dir)
        .args(["note", "delete", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("Note deleted."));

    cli_cmd(&data_dir)
        .args(["note", "show", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Note not found"));

    cli_cmd(&data_dir)
        .args(["note", "delete", &id])
        .assert()
        .failure();
}

#[test]
fn test_note_pending_tracks_changes() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["note", "pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing pending."));

    let id = add_note(&data_dir, "Queued", "waiting for sync");

    cli_cmd(&data_dir)
        .args(["note", "pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Save"))
        .stdout(predicate::str::contains(id.as_str()));

    run(&data_dir, &["note", "delete", &id]);

    cli_cmd(&data_dir)
        .args(["note", "pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Delete"));
}

// ============================================================================
// Ontology Command Tests
// ============================================================================

#[test]
fn test_ontology_add_nodes() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["ontology", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ontology is empty."));

    let root = extract_id(&run(&data_dir, &["ontology", "add-node", "Projects"])).unwrap();
    run(&data_dir, &["ontology", "add-node", "Garden", "--parent", &root]);

    cli_cmd(&data_dir)
        .args(["ontology", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("  - Projects"))
        .stdout(predicate::str::contains("    - Garden"));
}

#[test]
fn test_ontology_rejects_unknown_parent() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["ontology", "add-node", "Orphan", "--parent", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown parent node"));
}

// ============================================================================
// Relay Command Tests
// ============================================================================

#[test]
fn test_relay_list_shows_defaults() {
    let data_dir = TempDir::new().unwrap();

    cli_cmd(&data_dir)
        .args(["relay", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wss://relay.damus.io"))
        .stdout(predicate::str::contains("wss://nos.lol"));
}

#[test]
fn test_relay_add_and_remove() {
    let data_dir = TempDir::new().unwrap();

    run(&data_dir, &["relay", "add", "wss://relay.example.com"]);
    cli_cmd(&data_dir)
        .args(["relay", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("wss://relay.example.com"));

    cli_cmd(&data_dir)
        .args(["relay", "add", "wss://relay.example.com"])
        .assert()
        .failure();

    cli_cmd(&data_dir)
        .args(["relay", "add", "https://not-a-relay.example.com"])
        .assert()
        .failure();

    run(&data_dir, &["relay", "remove", "wss://relay.example.com"]);
    cli_cmd(&data_dir)
        .args(["relay", "remove", "wss://relay.example.com"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Relay not configured"));
}

// ============================================================================
// Sync Command Tests
// ============================================================================

#[test]
fn test_sync_requires_identity() {
    let data_dir = TempDir::new().unwrap();
    remove_all_relays(&data_dir);

    cli_cmd(&data_dir)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not logged in"));
}

#[test]
fn test_sync_without_relays_is_offline() {
    let data_dir = TempDir::new().unwrap();
    remove_all_relays(&data_dir);
    run(&data_dir, &["identity", "generate"]);
    add_note(&data_dir, "Local only", "no relays");

    cli_cmd(&data_dir)
        .args(["sync", "--full"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Offline"));

    // the edit is still waiting
    cli_cmd(&data_dir)
        .args(["note", "pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Save"));
}

#[test]
fn test_dm_send_requires_identity() {
    let data_dir = TempDir::new().unwrap();
    remove_all_relays(&data_dir);

    cli_cmd(&data_dir)
        .args(["dm", "send", &"ab".repeat(32), "hello"])
        .assert()
        .failure();

    cli_cmd(&data_dir)
        .args(["dm", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No messages."));
}

// ============================================================================
// Persistence Tests
// ============================================================================

#[test]
fn test_data_persists_between_invocations() {
    let data_dir = TempDir::new().unwrap();
    run(&data_dir, &["identity", "generate"]);
    let public = run(&data_dir, &["identity", "show"]);
    let id = add_note(&data_dir, "Persistent", "still here");

    assert_eq!(run(&data_dir, &["identity", "show"]), public);
    cli_cmd(&data_dir)
        .args(["note", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("still here"));
}
