//! Unit tests for the demo CLI

use crate::cli::{run, Cli, LogFormatArg};
use clap::Parser;

#[test]
fn test_defaults_parse() {
    let cli = Cli::try_parse_from(["jsgi-dispatch"]).unwrap();
    assert_eq!(cli.module, "demo");
    assert_eq!(cli.path, "/");
    assert!(!cli.r#async);
    assert_eq!(cli.chunks, 3);
    assert_eq!(cli.log_format, LogFormatArg::Pretty);
}

#[test]
fn test_flags_parse() {
    let cli = Cli::try_parse_from([
        "jsgi-dispatch",
        "--async",
        "--chunks",
        "7",
        "--path",
        "/feed",
        "--log-format",
        "json",
    ])
    .unwrap();
    assert!(cli.r#async);
    assert_eq!(cli.chunks, 7);
    assert_eq!(cli.path, "/feed");
    assert_eq!(cli.log_format, LogFormatArg::Json);
}

#[test]
fn test_sync_demo() {
    let cli = Cli::try_parse_from(["jsgi-dispatch", "--path", "/greet"]).unwrap();
    let output = run(&cli).unwrap();

    assert_eq!(output.status, Some(200));
    assert!(output
        .headers
        .contains(&("X-Powered-By".to_string(), "jsgi-dispatch".to_string())));
    assert_eq!(output.body, b"Hello from /greet\n");
}

#[test]
fn test_async_demo_streams_all_chunks() {
    let cli = Cli::try_parse_from(["jsgi-dispatch", "--async", "--chunks", "4"]).unwrap();
    let output = run(&cli).unwrap();

    assert_eq!(output.status, Some(200));
    assert_eq!(
        String::from_utf8(output.body).unwrap(),
        "chunk 0\nchunk 1\nchunk 2\nchunk 3\n"
    );
}

#[test]
fn test_unknown_module_fails() {
    let cli = Cli::try_parse_from(["jsgi-dispatch", "--module", "nope"]).unwrap();
    let err = run(&cli).unwrap_err();
    assert!(format!("{err:#}").contains("nope"));
}
