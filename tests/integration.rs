//! End-to-end tests driving the `gaceta` binary.
//!
//! Covers intake dedup, full pipeline runs, retry of failed documents,
//! reprocessing without stale artifacts, and destructive resets.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn gaceta_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("gaceta");
    path
}

/// Minimal valid single-page PDF containing the given phrase.
/// Builds body then xref with correct byte offsets so both extractors can
/// parse it.
fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::create_dir_all(root.join("bulletins")).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/gaceta.sqlite"

[storage]
root = "{root}/bulletins"

[server]
bind = "127.0.0.1:7419"

[chunking]
chunk_size = 400
chunk_overlap = 40
min_chunk_size = 10

[indexing]
use_relational = true
use_fulltext = true
use_vector = false
"#,
        root = root.display()
    );

    let config_path = root.join("config").join("gaceta.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_gaceta(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = gaceta_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run gaceta binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn write_bulletin(tmp: &TempDir, filename: &str, phrase: &str) {
    fs::write(tmp.path().join("bulletins").join(filename), minimal_pdf(phrase)).unwrap();
}

/// Extract the number from a `  label: N` line of CLI output.
fn count_after(stdout: &str, label: &str) -> i64 {
    stdout
        .lines()
        .find_map(|line| line.trim().strip_prefix(label).map(|rest| rest.trim()))
        .and_then(|n| n.split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .unwrap_or_else(|| panic!("no '{}' line in: {}", label, stdout))
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_gaceta(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_gaceta(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_gaceta(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_register_dedupes_identical_content() {
    let (tmp, config_path) = setup_test_env();
    run_gaceta(&config_path, &["init"]);

    // Two uploads of byte-identical content under different filenames.
    let outside = tmp.path().join("upload-a.pdf");
    fs::write(&outside, minimal_pdf("mismo contenido")).unwrap();
    let (stdout, _, success) =
        run_gaceta(&config_path, &["register", outside.to_str().unwrap()]);
    assert!(success, "register failed: {}", stdout);
    assert!(stdout.contains("document id: 1"));

    let outside_b = tmp.path().join("upload-b.pdf");
    fs::write(&outside_b, minimal_pdf("mismo contenido")).unwrap();
    let (stdout, _, success) =
        run_gaceta(&config_path, &["register", outside_b.to_str().unwrap()]);
    assert!(success);
    assert!(
        stdout.contains("duplicate of document 1"),
        "expected dedup, got: {}",
        stdout
    );

    // The registry holds one document, not two.
    let (stdout, _, _) = run_gaceta(&config_path, &["status"]);
    assert_eq!(count_after(&stdout, "Documents:"), 1);
}

#[test]
fn test_discover_registers_bulletins() {
    let (tmp, config_path) = setup_test_env();
    run_gaceta(&config_path, &["init"]);

    write_bulletin(&tmp, "2023-01-10_obras_1.pdf", "obras publicas uno");
    write_bulletin(&tmp, "2023-01-11_salud_2.pdf", "salud dos");
    fs::write(tmp.path().join("bulletins").join("notes.txt"), "not a pdf").unwrap();

    let (stdout, stderr, success) = run_gaceta(&config_path, &["discover"]);
    assert!(success, "discover failed: {}\n{}", stdout, stderr);
    assert!(stdout.contains("registered: 2"), "got: {}", stdout);

    // A second pass finds nothing new.
    let (stdout, _, _) = run_gaceta(&config_path, &["discover"]);
    assert!(stdout.contains("registered: 0"));
    assert!(stdout.contains("already known: 2"));
}

#[test]
fn test_process_all_completes_documents() {
    let (tmp, config_path) = setup_test_env();
    run_gaceta(&config_path, &["init"]);
    write_bulletin(&tmp, "2023-02-01_obras_1.pdf", "acuerdo de obra publica");
    write_bulletin(&tmp, "2023-02-02_salud_2.pdf", "aviso de salud municipal");
    run_gaceta(&config_path, &["discover"]);

    let (stdout, stderr, success) =
        run_gaceta(&config_path, &["process", "--all", "--progress", "off"]);
    assert!(success, "process failed: {}\n{}", stdout, stderr);
    assert_eq!(count_after(&stdout, "total:"), 2);
    assert_eq!(count_after(&stdout, "completed:"), 2);
    assert_eq!(count_after(&stdout, "failed:"), 0);

    let (stdout, _, _) = run_gaceta(&config_path, &["status"]);
    assert_eq!(count_after(&stdout, "completed"), 2);
    assert!(count_after(&stdout, "Chunks:") > 0);
    assert!(count_after(&stdout, "Full-text:") > 0);
    assert_eq!(count_after(&stdout, "Vectors:"), 0);
}

#[test]
fn test_missing_file_fails_and_batch_continues() {
    let (tmp, config_path) = setup_test_env();
    run_gaceta(&config_path, &["init"]);
    write_bulletin(&tmp, "2023-03-01_obras_1.pdf", "primero");
    write_bulletin(&tmp, "2023-03-02_obras_2.pdf", "segundo");
    run_gaceta(&config_path, &["discover"]);

    // One raw file disappears before processing.
    fs::remove_file(tmp.path().join("bulletins").join("2023-03-01_obras_1.pdf")).unwrap();

    let (stdout, _, success) =
        run_gaceta(&config_path, &["process", "--all", "--progress", "off"]);
    assert!(success);
    assert_eq!(count_after(&stdout, "completed:"), 1);
    assert_eq!(count_after(&stdout, "failed:"), 1);

    let (stdout, _, _) = run_gaceta(&config_path, &["status"]);
    assert_eq!(count_after(&stdout, "failed"), 1);
    assert_eq!(count_after(&stdout, "completed"), 1);
}

#[test]
fn test_retry_failed_document_from_scratch() {
    let (tmp, config_path) = setup_test_env();
    run_gaceta(&config_path, &["init"]);
    write_bulletin(&tmp, "2023-04-01_obras_1.pdf", "contenido que vuelve");
    run_gaceta(&config_path, &["discover"]);

    let bulletin = tmp.path().join("bulletins").join("2023-04-01_obras_1.pdf");
    let bytes = fs::read(&bulletin).unwrap();
    fs::remove_file(&bulletin).unwrap();

    let (stdout, _, success) =
        run_gaceta(&config_path, &["process", "--id", "1", "--progress", "off"]);
    assert!(success);
    assert!(stdout.contains("status: failed"), "got: {}", stdout);
    assert!(stdout.contains("missing"), "error not shown: {}", stdout);

    // The file comes back; retry restarts from extraction and completes.
    fs::write(&bulletin, &bytes).unwrap();
    let (stdout, _, success) =
        run_gaceta(&config_path, &["process", "--id", "1", "--progress", "off"]);
    assert!(success);
    assert!(stdout.contains("status: completed"), "got: {}", stdout);
}

#[test]
fn test_reprocess_leaves_no_stale_artifacts() {
    let (tmp, config_path) = setup_test_env();
    run_gaceta(&config_path, &["init"]);
    write_bulletin(&tmp, "2023-05-01_finanzas_1.pdf", "cuenta publica anual");
    run_gaceta(&config_path, &["discover"]);

    run_gaceta(&config_path, &["process", "--id", "1", "--progress", "off"]);
    let (stdout, _, _) = run_gaceta(&config_path, &["status"]);
    let chunks_first = count_after(&stdout, "Chunks:");
    assert!(chunks_first > 0);

    run_gaceta(&config_path, &["process", "--id", "1", "--progress", "off"]);
    let (stdout, _, _) = run_gaceta(&config_path, &["status"]);
    assert_eq!(count_after(&stdout, "Chunks:"), chunks_first);
    assert_eq!(count_after(&stdout, "Full-text:"), chunks_first);
}

#[test]
fn test_reset_one_returns_document_to_pending() {
    let (tmp, config_path) = setup_test_env();
    run_gaceta(&config_path, &["init"]);
    write_bulletin(&tmp, "2023-06-01_obras_1.pdf", "texto para reset");
    run_gaceta(&config_path, &["discover"]);
    run_gaceta(&config_path, &["process", "--all", "--progress", "off"]);

    let (stdout, _, success) = run_gaceta(&config_path, &["reset", "--id", "1"]);
    assert!(success, "reset failed: {}", stdout);

    let (stdout, _, _) = run_gaceta(&config_path, &["status"]);
    assert_eq!(count_after(&stdout, "pending"), 1);
    assert_eq!(count_after(&stdout, "Chunks:"), 0);
    assert_eq!(count_after(&stdout, "Full-text:"), 0);
}

#[test]
fn test_reset_all_requires_confirmation_phrase() {
    let (tmp, config_path) = setup_test_env();
    run_gaceta(&config_path, &["init"]);
    write_bulletin(&tmp, "2023-07-01_obras_1.pdf", "texto");
    run_gaceta(&config_path, &["discover"]);
    run_gaceta(&config_path, &["process", "--all", "--progress", "off"]);

    // --all without --confirm is rejected by argument parsing.
    let (_, _, success) = run_gaceta(&config_path, &["reset", "--all"]);
    assert!(!success);

    // A wrong phrase is refused and nothing is touched.
    let (_, stderr, success) =
        run_gaceta(&config_path, &["reset", "--all", "--confirm", "yes please"]);
    assert!(!success);
    assert!(stderr.contains("confirmation"), "got: {}", stderr);
    let (stdout, _, _) = run_gaceta(&config_path, &["status"]);
    assert_eq!(count_after(&stdout, "completed"), 1);

    // The exact phrase goes through.
    let (stdout, _, success) = run_gaceta(
        &config_path,
        &["reset", "--all", "--confirm", "RESET ALL DOCUMENTS"],
    );
    assert!(success, "reset --all failed: {}", stdout);
    let (stdout, _, _) = run_gaceta(&config_path, &["status"]);
    assert_eq!(count_after(&stdout, "pending"), 1);
    assert_eq!(count_after(&stdout, "Chunks:"), 0);
}

#[test]
fn test_fast_extractor_override() {
    let (tmp, config_path) = setup_test_env();
    run_gaceta(&config_path, &["init"]);
    write_bulletin(&tmp, "2023-08-01_obras_1.pdf", "texto por via rapida");
    run_gaceta(&config_path, &["discover"]);

    let (stdout, stderr, success) = run_gaceta(
        &config_path,
        &["process", "--id", "1", "--extractor", "fast", "--progress", "off"],
    );
    assert!(success, "fast extract failed: {}\n{}", stdout, stderr);
    assert!(stdout.contains("status: completed"));

    // An unknown strategy is rejected up front.
    let (_, stderr, success) = run_gaceta(
        &config_path,
        &["process", "--id", "1", "--extractor", "ocr", "--progress", "off"],
    );
    assert!(!success);
    assert!(stderr.contains("Unknown extractor"), "got: {}", stderr);
}

#[test]
fn test_config_prints_pipeline_defaults() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_gaceta(&config_path, &["config"]);
    assert!(success);
    assert!(stdout.contains("[extraction]"));
    assert!(stdout.contains("extractor = \"high_fidelity\""));
    assert!(stdout.contains("[chunking]"));
    assert!(stdout.contains("chunk_size = 400"));
    assert!(stdout.contains("[indexing]"));
}

#[test]
fn test_json_progress_emits_events() {
    let (tmp, config_path) = setup_test_env();
    run_gaceta(&config_path, &["init"]);
    write_bulletin(&tmp, "2023-09-01_obras_1.pdf", "texto con eventos");
    run_gaceta(&config_path, &["discover"]);

    let (_, stderr, success) =
        run_gaceta(&config_path, &["process", "--all", "--progress", "json"]);
    assert!(success);
    assert!(
        stderr.contains("pipeline.started"),
        "no started event on stderr: {}",
        stderr
    );
    assert!(stderr.contains("pipeline.document.stage"));
    assert!(stderr.contains("pipeline.completed"));
}
