//! End-to-end scenarios against a local fixture server.

mod support;

use std::path::PathBuf;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use support::server::{Route, TestServer};
use webgrab::config::{Config, HttpsEnforce, Timeout};
use webgrab::error::ExitStatus;
use webgrab::App;

fn base_config(out: &TempDir) -> Config {
    Config {
        robots: false,
        threads: 2,
        tries: 2,
        prefix_dir: Some(out.path().to_path_buf()),
        host_directories: false,
        connect_timeout: Timeout::After(Duration::from_secs(5)),
        read_timeout: Timeout::After(Duration::from_secs(10)),
        ..Config::default()
    }
}

fn run(cfg: Config, seeds: Vec<String>) -> ExitStatus {
    App::new(cfg, seeds).run()
}

// ==================== Basic recursive mirror ====================

#[test]
fn test_basic_mirror_stays_on_host() {
    let index_body = r#"<html><body>
        <a href="a.png">image</a>
        <a href="http://b.invalid/x">offsite</a>
    </body></html>"#;
    let server = TestServer::start();
    server.route("/index.html", Route::html(index_body));
    server.route("/a.png", Route::ok("image/png", b"PNGDATA".to_vec()));

    let out = TempDir::new().unwrap();
    let cfg = Config {
        recursive: true,
        level: 1,
        robots: true,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/index.html")]);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(
        std::fs::read(out.path().join("index.html")).unwrap(),
        index_body.as_bytes()
    );
    assert_eq!(std::fs::read(out.path().join("a.png")).unwrap(), b"PNGDATA");

    // Politeness: the very first request on the host is robots.txt.
    let requests = server.requests();
    assert_eq!(requests[0].path, "/robots.txt");
    // The foreign host never leaked into this server's request log.
    assert!(requests.iter().all(|r| r.path != "/x"));
}

#[test]
fn test_robots_disallow_is_honored() {
    let server = TestServer::start();
    server.route(
        "/robots.txt",
        Route::ok("text/plain", b"User-agent: *\nDisallow: /private/\n".to_vec()),
    );
    server.route(
        "/index.html",
        Route::html(r#"<a href="/private/secret.html">s</a><a href="/public.html">p</a>"#),
    );
    server.route("/public.html", Route::html("<p>ok</p>"));
    server.route("/private/secret.html", Route::html("<p>no</p>"));

    let out = TempDir::new().unwrap();
    let cfg = Config {
        recursive: true,
        level: 1,
        robots: true,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/index.html")]);

    assert_eq!(status, ExitStatus::Success);
    assert!(out.path().join("public.html").exists());
    assert!(!out.path().join("private").exists());
    assert!(server.requests_for("/private/secret.html").is_empty());
}

// ==================== Redirects ====================

#[test]
fn test_redirect_followed_to_target() {
    let server = TestServer::start();
    server.route("/old", Route::redirect("/new"));
    server.route("/new", Route::ok("text/plain", b"fresh".to_vec()));

    let out = TempDir::new().unwrap();
    let status = run(base_config(&out), vec![server.url("/old")]);

    assert_eq!(status, ExitStatus::Success);
    // The local name comes from the original URL, not the redirect target.
    assert_eq!(std::fs::read(out.path().join("old")).unwrap(), b"fresh");
}

#[test]
fn test_redirect_loop_is_protocol_error() {
    let server = TestServer::start();
    server.route("/a", Route::redirect("/b"));
    server.route("/b", Route::redirect("/a"));

    let out = TempDir::new().unwrap();
    let cfg = Config {
        max_redirect: 5,
        threads: 1,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/a")]);

    assert_eq!(status, ExitStatus::Protocol);
    assert_eq!(status.code(), 7);
}

#[test]
fn test_redirect_chain_limit() {
    let server = TestServer::start();
    server.route("/r0", Route::redirect("/r1"));
    server.route("/r1", Route::redirect("/r2"));
    server.route("/r2", Route::redirect("/r3"));
    server.route("/r3", Route::ok("text/plain", b"end".to_vec()));

    let out = TempDir::new().unwrap();
    let cfg = Config {
        max_redirect: 2,
        threads: 1,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/r0")]);

    assert_eq!(status, ExitStatus::Protocol);
    assert!(server.requests_for("/r3").is_empty(), "chain cut before /r3");
}

// ==================== HTTPS enforcement ====================

#[test]
fn test_https_enforce_hard_never_falls_back() {
    let server = TestServer::start();
    server.route("/x", Route::ok("text/plain", b"plain".to_vec()));

    let out = TempDir::new().unwrap();
    let cfg = Config {
        https_enforce: HttpsEnforce::Hard,
        threads: 1,
        tries: 1,
        connect_timeout: Timeout::After(Duration::from_secs(2)),
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/x")]);

    assert_eq!(status, ExitStatus::Network);
    assert_eq!(status.code(), 4);
    assert!(
        server.requests().is_empty(),
        "the plain-http server must never be contacted"
    );
}

// ==================== Chunked download ====================

#[test]
fn test_chunked_download_reassembles_exactly() {
    let body: Vec<u8> = (0..1_048_576u32).map(|i| (i % 251) as u8).collect();
    let server = TestServer::start();
    server.route("/big.bin", Route::ok("application/octet-stream", body.clone()).with_ranges());

    let out = TempDir::new().unwrap();
    let cfg = Config {
        chunk_size: Some(256 * 1024),
        threads: 4,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/big.bin")]);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(std::fs::read(out.path().join("big.bin")).unwrap(), body);

    let requests = server.requests_for("/big.bin");
    let heads: Vec<_> = requests.iter().filter(|r| r.method == "HEAD").collect();
    let ranged: Vec<_> = requests
        .iter()
        .filter(|r| r.method == "GET" && r.header("range").is_some())
        .collect();
    assert_eq!(heads.len(), 1, "one size probe");
    assert_eq!(ranged.len(), 4, "four part fetches");
    let mut starts: Vec<String> = ranged
        .iter()
        .map(|r| r.header("range").unwrap().to_string())
        .collect();
    starts.sort();
    assert_eq!(
        starts,
        vec![
            "bytes=0-262143",
            "bytes=262144-524287",
            "bytes=524288-786431",
            "bytes=786432-1048575",
        ]
    );
}

#[test]
fn test_small_file_not_chunked() {
    let server = TestServer::start();
    server.route("/small.bin", Route::ok("application/octet-stream", b"tiny".to_vec()).with_ranges());

    let out = TempDir::new().unwrap();
    let cfg = Config {
        chunk_size: Some(1 << 20),
        threads: 2,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/small.bin")]);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(std::fs::read(out.path().join("small.bin")).unwrap(), b"tiny");
    let ranged = server
        .requests_for("/small.bin")
        .into_iter()
        .filter(|r| r.header("range").is_some())
        .count();
    assert_eq!(ranged, 0, "below the chunk threshold nothing is ranged");
}

// ==================== Metalink ====================

#[test]
fn test_metalink_mirror_failover_and_hash_check() {
    let payload = b"metalink payload content, split into two pieces".to_vec();
    let digest = hex::encode(Sha256::digest(&payload));

    let server = TestServer::start();
    // Mirror 1 always fails; mirror 2 serves ranges.
    server.route("/m1/file.bin", Route::new(500, "text/plain", b"dead".to_vec()).with_fail_first(1000));
    server.route("/m2/file.bin", Route::ok("application/octet-stream", payload.clone()).with_ranges());
    let metalink_doc = format!(
        r#"<?xml version="1.0"?>
<metalink xmlns="urn:ietf:params:xml:ns:metalink">
  <file name="file.bin">
    <size>{}</size>
    <hash type="sha-256">{digest}</hash>
    <url priority="1">{}</url>
    <url priority="2">{}</url>
  </file>
</metalink>"#,
        payload.len(),
        server.url("/m1/file.bin"),
        server.url("/m2/file.bin"),
    );
    server.route(
        "/file.meta4",
        Route::ok("application/metalink4+xml", metalink_doc.into_bytes()),
    );

    let out = TempDir::new().unwrap();
    let cfg = Config {
        metalink: true,
        chunk_size: Some(24),
        threads: 1,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/file.meta4")]);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(std::fs::read(out.path().join("file.bin")).unwrap(), payload);
    assert!(
        !server.requests_for("/m1/file.bin").is_empty(),
        "the dead mirror was tried first"
    );
    assert!(!server.requests_for("/m2/file.bin").is_empty());
}

#[test]
fn test_metalink_hash_mismatch_sets_integrity_status() {
    let payload = b"the served bytes".to_vec();
    let server = TestServer::start();
    server.route("/m/file.bin", Route::ok("application/octet-stream", payload.clone()).with_ranges());
    let metalink_doc = format!(
        r#"<metalink xmlns="urn:ietf:params:xml:ns:metalink">
  <file name="file.bin">
    <size>{}</size>
    <hash type="sha-256">{}</hash>
    <url priority="1">{}</url>
  </file>
</metalink>"#,
        payload.len(),
        "00".repeat(32),
        server.url("/m/file.bin"),
    );
    server.route(
        "/file.meta4",
        Route::ok("application/metalink4+xml", metalink_doc.into_bytes()),
    );

    let out = TempDir::new().unwrap();
    let cfg = Config {
        metalink: true,
        threads: 1,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/file.meta4")]);

    assert_eq!(status, ExitStatus::Integrity);
    assert_eq!(status.code(), 9);
}

// ==================== Clobber rules ====================

#[test]
fn test_no_clobber_rerun_performs_no_fetch() {
    let server = TestServer::start();
    server.route("/f.txt", Route::ok("text/plain", b"payload".to_vec()));

    let out = TempDir::new().unwrap();
    let first = run(base_config(&out), vec![server.url("/f.txt")]);
    assert_eq!(first, ExitStatus::Success);
    let fetches_after_first = server.requests_for("/f.txt").len();

    let cfg = Config {
        no_clobber: true,
        ..base_config(&out)
    };
    let second = run(cfg, vec![server.url("/f.txt")]);
    assert_eq!(second, ExitStatus::Success);
    assert_eq!(
        server.requests_for("/f.txt").len(),
        fetches_after_first,
        "no-clobber rerun must not hit the network"
    );
    assert_eq!(std::fs::read(out.path().join("f.txt")).unwrap(), b"payload");
}

#[test]
fn test_continue_resumes_with_range_from_local_size() {
    let body = b"hello resumable world".to_vec();
    let server = TestServer::start();
    server.route("/f.bin", Route::ok("application/octet-stream", body.clone()).with_ranges());

    let out = TempDir::new().unwrap();
    std::fs::write(out.path().join("f.bin"), &body[..5]).unwrap();

    let cfg = Config {
        continue_download: true,
        threads: 1,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/f.bin")]);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(std::fs::read(out.path().join("f.bin")).unwrap(), body);
    let requests = server.requests_for("/f.bin");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].header("range"), Some("bytes=5-"));
}

#[test]
fn test_timestamping_leaves_unmodified_file_alone() {
    let server = TestServer::start();
    server.route(
        "/page.html",
        Route::html("<p>server copy</p>").with_not_modified_on_ims(),
    );

    let out = TempDir::new().unwrap();
    let local = out.path().join("page.html");
    std::fs::write(&local, b"local copy").unwrap();

    let cfg = Config {
        timestamping: true,
        threads: 1,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/page.html")]);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(std::fs::read(&local).unwrap(), b"local copy");
    let requests = server.requests_for("/page.html");
    assert_eq!(requests.len(), 1);
    assert!(requests[0].header("if-modified-since").is_some());
}

// ==================== Content-Disposition ====================

#[test]
fn test_content_disposition_names_the_download() {
    let server = TestServer::start();
    server.route(
        "/dl.bin",
        Route::ok("application/pdf", b"pdf bytes".to_vec())
            .with_header("Content-Disposition", "attachment; filename=\"report.pdf\""),
    );

    let out = TempDir::new().unwrap();
    let status = run(base_config(&out), vec![server.url("/dl.bin")]);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(
        std::fs::read(out.path().join("report.pdf")).unwrap(),
        b"pdf bytes"
    );
    assert!(!out.path().join("dl.bin").exists());
}

#[test]
fn test_content_disposition_does_not_override_redirect_name() {
    let server = TestServer::start();
    server.route("/old", Route::redirect("/new"));
    server.route(
        "/new",
        Route::ok("text/plain", b"fresh".to_vec())
            .with_header("Content-Disposition", "attachment; filename=\"other.bin\""),
    );

    let out = TempDir::new().unwrap();
    let status = run(base_config(&out), vec![server.url("/old")]);

    assert_eq!(status, ExitStatus::Success);
    // The forced local name from the original URL wins over the header.
    assert_eq!(std::fs::read(out.path().join("old")).unwrap(), b"fresh");
    assert!(!out.path().join("other.bin").exists());
}

#[test]
fn test_content_disposition_target_is_disambiguated() {
    let server = TestServer::start();
    server.route(
        "/dl.bin",
        Route::ok("application/octet-stream", b"new data".to_vec())
            .with_header("Content-Disposition", "attachment; filename=\"report.pdf\""),
    );

    let out = TempDir::new().unwrap();
    std::fs::write(out.path().join("report.pdf"), b"precious").unwrap();

    let status = run(base_config(&out), vec![server.url("/dl.bin")]);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(
        std::fs::read(out.path().join("report.pdf")).unwrap(),
        b"precious"
    );
    assert_eq!(
        std::fs::read(out.path().join("report.pdf.1")).unwrap(),
        b"new data"
    );
}

#[test]
fn test_content_disposition_target_honors_no_clobber() {
    let server = TestServer::start();
    server.route(
        "/dl.bin",
        Route::ok("application/octet-stream", b"new data".to_vec())
            .with_header("Content-Disposition", "attachment; filename=\"report.pdf\""),
    );

    let out = TempDir::new().unwrap();
    std::fs::write(out.path().join("report.pdf"), b"precious").unwrap();

    let cfg = Config {
        no_clobber: true,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/dl.bin")]);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(
        std::fs::read(out.path().join("report.pdf")).unwrap(),
        b"precious"
    );
    assert!(!out.path().join("report.pdf.1").exists());
    assert!(!out.path().join("dl.bin").exists());
}

// ==================== Auth ====================

#[test]
fn test_basic_auth_retry_after_challenge() {
    let server = TestServer::start();
    server.route(
        "/secret.txt",
        Route::ok("text/plain", b"let me in".to_vec()).with_basic_auth(),
    );

    let out = TempDir::new().unwrap();
    let cfg = Config {
        user: Some("alice".to_string()),
        password: Some("sesame".to_string()),
        threads: 1,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/secret.txt")]);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(
        std::fs::read(out.path().join("secret.txt")).unwrap(),
        b"let me in"
    );
    let requests = server.requests_for("/secret.txt");
    assert_eq!(requests.len(), 2, "challenge then authenticated retry");
    assert!(requests[0].header("authorization").is_none());
    assert!(requests[1].header("authorization").unwrap().starts_with("Basic "));
}

#[test]
fn test_auth_failure_without_credentials() {
    let server = TestServer::start();
    server.route(
        "/secret.txt",
        Route::ok("text/plain", b"never".to_vec()).with_basic_auth(),
    );

    let out = TempDir::new().unwrap();
    let cfg = Config {
        threads: 1,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/secret.txt")]);

    assert_eq!(status, ExitStatus::Auth);
    assert_eq!(status.code(), 6);
    assert!(!out.path().join("secret.txt").exists());
}

// ==================== Spider & 404 ====================

#[test]
fn test_spider_checks_without_saving() {
    let server = TestServer::start();
    server.route("/exists.html", Route::html("<p>here</p>"));

    let out = TempDir::new().unwrap();
    let cfg = Config {
        spider: true,
        threads: 1,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/exists.html")]);

    assert_eq!(status, ExitStatus::Success);
    assert!(!out.path().join("exists.html").exists());
    let requests = server.requests_for("/exists.html");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "HEAD");
}

#[test]
fn test_missing_remote_file_sets_exit_8() {
    let server = TestServer::start();

    let out = TempDir::new().unwrap();
    let cfg = Config {
        threads: 1,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/nope.txt")]);

    assert_eq!(status, ExitStatus::RemoteMissing);
    assert_eq!(status.code(), 8);
}

// ==================== Retry on server errors ====================

#[test]
fn test_transient_5xx_retried_until_success() {
    let server = TestServer::start();
    server.route(
        "/flaky.txt",
        Route::ok("text/plain", b"finally".to_vec()).with_fail_first(1),
    );

    let out = TempDir::new().unwrap();
    let cfg = Config {
        threads: 1,
        tries: 3,
        waitretry: Some(Duration::from_millis(50)),
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/flaky.txt")]);

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(std::fs::read(out.path().join("flaky.txt")).unwrap(), b"finally");
    assert_eq!(server.requests_for("/flaky.txt").len(), 2);
}

// ==================== Exit status aggregation ====================

#[test]
fn test_lowest_exit_code_wins_across_jobs() {
    let server = TestServer::start();
    server.route("/ok.txt", Route::ok("text/plain", b"fine".to_vec()));
    // /gone.txt -> 404 (code 8)

    let out = TempDir::new().unwrap();
    let cfg = Config {
        threads: 1,
        ..base_config(&out)
    };
    let status = run(
        cfg,
        vec![server.url("/ok.txt"), server.url("/gone.txt")],
    );

    assert_eq!(status, ExitStatus::RemoteMissing);
}

// ==================== File layout ====================

#[test]
fn test_host_directories_layout() {
    let server = TestServer::start();
    server.route("/d/f.txt", Route::ok("text/plain", b"x".to_vec()));

    let out = TempDir::new().unwrap();
    let cfg = Config {
        host_directories: true,
        ..base_config(&out)
    };
    let status = run(cfg, vec![server.url("/d/f.txt")]);

    assert_eq!(status, ExitStatus::Success);
    let expected: PathBuf = out
        .path()
        .join(format!("127.0.0.1:{}", server.port()))
        .join("d/f.txt");
    assert!(expected.exists(), "missing {}", expected.display());
}
