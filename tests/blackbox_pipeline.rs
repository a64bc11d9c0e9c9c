use std::fs;
use std::path::Path;

use flowtag::analyzer::{Analyzer, RunOutcome, RunPhase, RunSummary};
use flowtag::config::Config;
use flowtag::error::{Error, LoadError};
use flowtag::mapping::UNTAGGED;
use tokio_util::sync::CancellationToken;

const LOOKUP: &str = "\
dstport,protocol,tag
25,tcp,sv_P1
68,udp,sv_P2
23,tcp,sv_P1
31,udp,SV_P3
443,tcp,sv_P2
22,tcp,sv_P4
3389,tcp,sv_P5
0,icmp,sv_P5
110,tcp,email
993,tcp,email
143,tcp,email
";

const PROTOCOLS: &str = "\
Decimal,Keyword,Protocol,IPv6 Extension Header,Reference
1,ICMP,Internet Control Message,,[RFC792]
6,TCP,Transmission Control,,[RFC9293]
17,UDP,User Datagram,,[RFC768]
143-252,,Unassigned,,[Internet_Assigned_Numbers_Authority]
";

fn flow_line(dst_port: u16, protocol: u16) -> String {
    format!(
        "2 123456789012 eni-0a1b2c3d 10.0.1.201 198.51.100.2 49153 {dst_port} {protocol} 25 20000 1620140761 1620140821 ACCEPT OK"
    )
}

fn sample_log() -> String {
    let mut log = String::new();
    for (port, proto) in [
        (443, 6),
        (23, 6),
        (25, 6),
        (110, 6),
        (993, 6),
        (143, 6),
        (1024, 6),
        (80, 6),
        (443, 6),
        (68, 17),
        (0, 1),
        (443, 6),
    ] {
        log.push_str(&flow_line(port, proto));
        log.push('\n');
    }
    log.push('\n');
    log.push_str("2 123456789012 eni-short 10.0.0.1 10.0.0.2\n");
    log.push_str(&flow_line(443, 47));
    log.push('\n');
    log
}

fn write_inputs(dir: &Path, log: &str) -> Config {
    fs::write(dir.join("lookup.csv"), LOOKUP).unwrap();
    fs::write(dir.join("protocol-numbers.csv"), PROTOCOLS).unwrap();
    fs::write(dir.join("flow.log"), log).unwrap();

    let mut cfg = Config::default();
    cfg.input.flow_logs = Some(dir.join("flow.log"));
    cfg.input.tag_mappings = Some(dir.join("lookup.csv"));
    cfg.input.protocol_numbers = Some(dir.join("protocol-numbers.csv"));
    cfg.output.report = Some(dir.join("output.txt"));
    cfg
}

async fn run_to_completion(cfg: Config) -> RunSummary {
    let mut analyzer = Analyzer::new(cfg).expect("valid config");
    let outcome = analyzer
        .run(&CancellationToken::new())
        .await
        .expect("run succeeds");
    assert_eq!(analyzer.phase(), RunPhase::Done);
    match outcome {
        RunOutcome::Completed(summary) => summary,
        RunOutcome::Cancelled(_) => panic!("run unexpectedly cancelled"),
    }
}

#[tokio::test]
async fn pipeline_blackbox_report_format() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_inputs(dir.path(), &sample_log());
    let summary = run_to_completion(cfg).await;

    let expected = "
Tag Counts:
Tag,Count
Untagged 2
email 3
sv_P1 2
sv_P2 4
sv_P5 1

Port/Protocol Combination Counts:
Port,Protocol,Count
0 icmp 1
23 tcp 1
25 tcp 1
68 udp 1
80 tcp 1
110 tcp 1
143 tcp 1
443 tcp 3
993 tcp 1
1024 tcp 1
";
    let written = fs::read_to_string(dir.path().join("output.txt")).unwrap();
    assert_eq!(written, expected);

    // Blank line, short line, and unknown protocol 47 are rejected.
    assert_eq!(summary.snapshot.errors, 3);
    assert_eq!(summary.stats.lines_read, 15);
}

#[tokio::test]
async fn pipeline_blackbox_counts_match_valid_lines() {
    let dir = tempfile::tempdir().unwrap();
    let mut log = String::new();
    let mut valid = 0u64;
    for i in 0..2_500u16 {
        if i % 7 == 0 {
            log.push_str("malformed record\n");
            continue;
        }
        log.push_str(&flow_line([25, 443, 110, 5000][usize::from(i % 4)], 6));
        log.push('\n');
        valid += 1;
    }

    let mut cfg = write_inputs(dir.path(), &log);
    cfg.engine.batch_size = 64;
    cfg.engine.workers = 4;
    let summary = run_to_completion(cfg).await;

    let snap = &summary.snapshot;
    assert_eq!(snap.records(), valid);
    assert_eq!(snap.tag_counts.values().sum::<u64>(), valid);
    assert_eq!(snap.errors, 2_500 - valid);
    assert_eq!(summary.stats.lines_read, 2_500);
    assert_eq!(summary.stats.batches_in_flight(), 0);
    assert!(snap.tag_count(UNTAGGED) > 0);
}

#[tokio::test]
async fn pipeline_blackbox_report_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let log = sample_log().repeat(50);

    let mut serial = write_inputs(dir.path(), &log);
    serial.engine.workers = 1;
    serial.output.report = Some(dir.path().join("serial.txt"));
    run_to_completion(serial).await;

    let mut parallel = write_inputs(dir.path(), &log);
    parallel.engine.workers = 8;
    parallel.engine.batch_size = 3;
    parallel.output.report = Some(dir.path().join("parallel.txt"));
    run_to_completion(parallel).await;

    let serial = fs::read(dir.path().join("serial.txt")).unwrap();
    let parallel = fs::read(dir.path().join("parallel.txt")).unwrap();
    assert_eq!(serial, parallel);
}

#[tokio::test]
async fn pipeline_blackbox_bad_mapping_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_inputs(dir.path(), &sample_log());
    fs::write(dir.path().join("lookup.csv"), "dstport,protocol,tag\nhttp,tcp,web\n").unwrap();

    let mut analyzer = Analyzer::new(cfg).unwrap();
    let err = analyzer.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, Error::Load(LoadError::Tags(_))));
    assert_eq!(analyzer.phase(), RunPhase::Failed);
    assert!(!dir.path().join("output.txt").exists());
}

#[tokio::test]
async fn pipeline_blackbox_builtin_protocols() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = write_inputs(dir.path(), &sample_log());
    cfg.input.protocol_numbers = None;
    let summary = run_to_completion(cfg).await;

    // The built-in table knows GRE, so protocol 47 is no longer rejected.
    assert_eq!(summary.snapshot.errors, 2);
    assert_eq!(summary.snapshot.combination_count(443, "gre"), 1);
}

#[tokio::test]
async fn pipeline_blackbox_cancelled_run_keeps_previous_report() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = write_inputs(dir.path(), &sample_log());
    fs::write(dir.path().join("output.txt"), "previous report\n").unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut analyzer = Analyzer::new(cfg).unwrap();
    let outcome = analyzer.run(&cancel).await.unwrap();

    assert!(matches!(outcome, RunOutcome::Cancelled(_)));
    assert_eq!(analyzer.phase(), RunPhase::Cancelled);
    assert_eq!(
        fs::read_to_string(dir.path().join("output.txt")).unwrap(),
        "previous report\n"
    );
}
