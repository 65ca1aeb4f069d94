use std::fs;

use predicates::prelude::*;

#[test]
fn toc_filter_previews_substantive_chapters() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let book = dir.path().join("prueba.book.json");
    fs::write(
        &book,
        serde_json::json!({
            "title": "Prueba",
            "toc": [
                { "title": "Cover", "reference": "cover.xhtml" },
                { "title": "Capítulo 1", "reference": "ch1.xhtml" }
            ],
            "chapters": [
                { "reference": "cover.xhtml", "text": "![cubierta](cover.png)" },
                { "reference": "ch1.xhtml", "text": vec!["palabra"; 80].join(" ") }
            ]
        })
        .to_string(),
    )
    .expect("write book file");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("resumidor");
    cmd.args(["toc", "filter", "--book", book.to_str().expect("utf-8 path")])
        .assert()
        .success()
        .stdout(predicate::str::contains("Capítulo 1 (80 palabras)"))
        .stdout(predicate::str::contains("Cover").not());
}

#[test]
fn run_requires_a_book_source() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("resumidor");
    cmd.args(["run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--book"));
}

#[test]
fn rust_log_debug_emits_debug_line_to_stderr() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("resumidor");
    cmd.env("RUST_LOG", "debug")
        .args(["toc", "filter", "--book", "/nonexistent/x.book.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("parsed cli"));
}
