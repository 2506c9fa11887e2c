//! CLI integration tests: run the `rag` binary against a scratch directory,
//! with the embedding and chat endpoints served by `mockito`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const API_KEY_ENV: &str = "RAG_HARNESS_IT_KEY";
const EMBEDDING: &str = r#"{"data":[{"index":0,"embedding":[0.12,-0.4,0.33,0.9]}]}"#;

fn rag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rag");
    path
}

/// Scratch directory with a two-page text document and a config file.
/// `providers` is appended verbatim to the config.
fn setup_test_env(providers: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("docs")).unwrap();
    fs::write(
        root.join("docs").join("manual.txt"),
        "Chapter 1. Airdrop Operations\n\n\
1.1 Surface wind limits for CDS airdrops are 13 knots.\n\n\
1.2 High-velocity drops allow 17 knots.\
\x0c\
Chapter 2. Landing Zones\n\n\
2.1 HLZ surveys are approved by the wing commander.\n\n\
2.2 Landing zone markings use panels visible from three nautical miles in daylight, \
and lighting kits are inspected before every night operation.",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/rag.sqlite"

[document]
path = "{root}/docs/manual.txt"
corpus_name = "the test manual"

[chunking]
chunk_size = 30
chunk_overlap = 5

[retrieval]
num_candidates = 100
limit = 3

{providers}
"#,
        root = root.display(),
        providers = providers
    );

    let config_path = root.join("config").join("rag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn providers(base_url: &str, dims: usize) -> String {
    format!(
        r#"[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = {dims}
base_url = "{base_url}"
api_key_env = "{API_KEY_ENV}"

[generation]
provider = "openai"
model = "gpt-4o"
base_url = "{base_url}"
api_key_env = "{API_KEY_ENV}"
"#
    )
}

fn run_rag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env(API_KEY_ENV, "sk-test")
        .env_remove("RUST_LOG")
        .env_remove("RAG_DB_PATH")
        .env_remove("RAG_DOCUMENT_PATH")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Value of an `  name: N` line in command output.
fn count_field(stdout: &str, name: &str) -> u64 {
    let prefix = format!("  {}: ", name);
    stdout
        .lines()
        .find_map(|l| l.strip_prefix(&prefix))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or_else(|| panic!("no '{}' in output: {}", name, stdout))
}

fn mock_embeddings(server: &mut mockito::Server) -> mockito::Mock {
    server
        .mock("POST", "/v1/embeddings")
        .match_header("authorization", "Bearer sk-test")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(EMBEDDING)
        .expect_at_least(1)
        .create()
}

#[test]
fn test_init_without_embeddings_creates_schema_only() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_rag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Database initialized"));
    assert!(stdout.contains("index: skipped"));

    let (_, _, again) = run_rag(&config_path, &["init"]);
    assert!(again, "second init failed (not idempotent)");
}

#[test]
fn test_init_provisions_index_idempotently() {
    let server = mockito::Server::new();
    let (_tmp, config_path) = setup_test_env(&providers(&server.url(), 4));

    let (stdout, stderr, success) = run_rag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("vector_index"));
    assert!(stdout.contains("created"));

    let (stdout, _, success) = run_rag(&config_path, &["init"]);
    assert!(success);
    assert!(stdout.contains("already present"));
}

#[test]
fn test_init_refuses_to_change_dimensions() {
    let server = mockito::Server::new();
    let (_tmp, config_path) = setup_test_env(&providers(&server.url(), 4));
    let (_, _, success) = run_rag(&config_path, &["init"]);
    assert!(success);

    let content = fs::read_to_string(&config_path)
        .unwrap()
        .replace("dims = 4", "dims = 8");
    fs::write(&config_path, content).unwrap();

    let (stdout, _, success) = run_rag(&config_path, &["init"]);
    assert!(!success, "dimension change should fail");
    assert!(stdout.contains("Error"));

    let (stdout, stderr, success) = run_rag(&config_path, &["init", "--force"]);
    assert!(success, "forced init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(8 dims, text-embedding-3-small) created"));
}

#[test]
fn test_ingest_dry_run_needs_no_provider() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, stderr, success) = run_rag(&config_path, &["ingest", "--dry-run"]);
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingest manual.txt (dry-run)"));
    assert_eq!(count_field(&stdout, "pages"), 2);
    assert!(count_field(&stdout, "chunks") >= 2);
}

#[test]
fn test_ingest_reports_inserted_count() {
    let mut server = mockito::Server::new();
    let embeddings = mock_embeddings(&mut server);
    let (_tmp, config_path) = setup_test_env(&providers(&server.url(), 4));

    let (stdout, stderr, success) = run_rag(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingest manual.txt"));
    let chunks = count_field(&stdout, "chunks");
    assert_eq!(count_field(&stdout, "inserted"), chunks);
    assert_eq!(count_field(&stdout, "failed"), 0);
    assert!(stdout.trim_end().ends_with("ok"));
    embeddings.assert();

    // Re-ingesting replaces the previous records.
    let (stdout, _, success) = run_rag(&config_path, &["ingest"]);
    assert!(success);
    assert_eq!(count_field(&stdout, "deleted"), chunks);

    // --append keeps them.
    let (stdout, _, success) = run_rag(&config_path, &["ingest", "--append"]);
    assert!(success);
    assert_eq!(count_field(&stdout, "deleted"), 0);

    let (stdout, _, success) = run_rag(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("manual.txt"));
    assert!(stdout.contains(&format!("Records:     {}", chunks * 2)));
}

#[test]
fn test_embedding_failure_exits_nonzero() {
    let mut server = mockito::Server::new();
    server
        .mock("POST", "/v1/embeddings")
        .with_status(500)
        .with_body("upstream exploded")
        .create();
    let (_tmp, config_path) = setup_test_env(&providers(&server.url(), 4));

    let (stdout, _, success) = run_rag(&config_path, &["ingest"]);
    assert!(!success);
    assert!(stdout.contains("500"), "stdout={}", stdout);

    let (stdout, _, success) = run_rag(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Records:     0"));
}

#[test]
fn test_search_prints_ranked_chunks() {
    let mut server = mockito::Server::new();
    mock_embeddings(&mut server);
    let (_tmp, config_path) = setup_test_env(&providers(&server.url(), 4));

    let (_, _, success) = run_rag(&config_path, &["ingest"]);
    assert!(success);

    let (stdout, stderr, success) = run_rag(&config_path, &["search", "wind limits"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("1. ["));
    assert!(stdout.contains("manual.txt p."));
    assert!(!stdout.contains("4. ["), "limit of 3 exceeded: {}", stdout);

    let (stdout, _, success) =
        run_rag(&config_path, &["search", "wind", "--source", "other.pdf"]);
    assert!(success);
    assert!(stdout.contains("No results."));

    let (stdout, _, success) = run_rag(&config_path, &["search", "wind", "--exact", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("1. ["));
    assert!(!stdout.contains("2. ["));
}

#[test]
fn test_search_rejects_conflicting_params() {
    let mut server = mockito::Server::new();
    mock_embeddings(&mut server);
    let (_tmp, config_path) = setup_test_env(&providers(&server.url(), 4));

    let (stdout, _, success) = run_rag(
        &config_path,
        &["search", "wind", "--exact", "--num-candidates", "50"],
    );
    assert!(!success);
    assert!(stdout.contains("num_candidates"));

    let (stdout, _, success) = run_rag(&config_path, &["search", "wind", "--num-candidates", "2"]);
    assert!(!success);
    assert!(stdout.contains("must be >= limit"));
}

#[test]
fn test_ask_prints_answer_verbatim() {
    let mut server = mockito::Server::new();
    mock_embeddings(&mut server);
    let answer = "The wing commander approves HLZ surveys (Chapter 2, 2.1).";
    let chat = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(mockito::Matcher::Regex(
            "Who has approval authority for HLZ surveys\\?".to_string(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"choices":[{{"index":0,"message":{{"role":"assistant","content":"{}"}}}}]}}"#,
            answer
        ))
        .expect(1)
        .create();
    let (_tmp, config_path) = setup_test_env(&providers(&server.url(), 4));

    let (_, _, success) = run_rag(&config_path, &["ingest"]);
    assert!(success);

    let (stdout, stderr, success) = run_rag(
        &config_path,
        &["ask", "Who has approval authority for HLZ surveys?"],
    );
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    assert_eq!(stdout.trim_end(), answer);
    chat.assert();
}

#[test]
fn test_ask_show_context() {
    let mut server = mockito::Server::new();
    mock_embeddings(&mut server);
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(r#"{"choices":[{"message":{"content":"I don't know."}}]}"#)
        .create();
    let (_tmp, config_path) = setup_test_env(&providers(&server.url(), 4));
    run_rag(&config_path, &["ingest"]);

    let (stdout, _, success) = run_rag(&config_path, &["ask", "wind?", "--show-context"]);
    assert!(success);
    assert!(stdout.contains("context (3 chunks):"));
    assert!(stdout.contains("---"));
    assert!(stdout.trim_end().ends_with("I don't know."));
}

#[test]
fn test_ask_with_generation_disabled_fails() {
    let (_tmp, config_path) = setup_test_env("");

    let (stdout, _, success) = run_rag(&config_path, &["ask", "anything?"]);
    assert!(!success);
    assert!(stdout.contains("Error"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) = run_rag(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stdout.contains("Failed to read config file"));
}

#[test]
fn test_ask_reaches_file_ingested_outside_config() {
    let mut server = mockito::Server::new();
    mock_embeddings(&mut server);
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(r#"{"choices":[{"message":{"content":"Thirteen knots."}}]}"#)
        .create();
    let (tmp, config_path) = setup_test_env(&providers(&server.url(), 4));
    let other = tmp.path().join("docs").join("other.txt");
    fs::write(&other, "Surface wind limits for CDS airdrops are 13 knots.").unwrap();

    let (stdout, stderr, success) =
        run_rag(&config_path, &["ingest", "--file", other.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stderr.contains("does not match the configured retrieval filter"));

    let (stdout, _, success) = run_rag(&config_path, &["ask", "wind?", "--show-context"]);
    assert!(success);
    assert!(stdout.contains("context (0 chunks):"));

    let (stdout, _, success) = run_rag(
        &config_path,
        &["ask", "wind?", "--all-sources", "--show-context"],
    );
    assert!(success);
    assert!(stdout.contains("context (1 chunks):"));
    assert!(stdout.trim_end().ends_with("Thirteen knots."));

    let (stdout, _, success) = run_rag(&config_path, &["ask", "wind?", "--source", "other.txt"]);
    assert!(success);
    assert_eq!(stdout.trim_end(), "Thirteen knots.");
}
