#![cfg(unix)]

use chrono::Utc;
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use impact_runner::{ImpactRun, RunConfig, RunOutcome, RunState};

const INPUT: &str = "! two-cell test deck\n\
    1 1\n\
    1e-12 100 1\n\
    6 3 1 0 2 0 0.02\n\
    16 16 16 1 0.015 0.015 45.0\n\
    16 0 0 1 1.4e-11\n\
    0.001 0.0 0.0 1.0 1.0 0.0 0.0\n\
    0.001 0.0 0.0 1.0 1.0 0.0 0.0\n\
    0.0001 0.0 0.0 1.0 1.0 0.0 0.0\n\
    0.13 1.0 511005.0 -1.0 1.3e9 0.0\n\
    0.3 4 20 105 0.0 47.5 1.3e9 -3.5 1 0.15 0 0 0 0 0 0.24 /!name:GUN\n\
    0.5 0 0 0 0.3 0.01 /!name:D1\n\
    0 1 101 -2 0 0 0.8 /!name:WB\n\
    0 0 0 -99 0 0 0.8 /!name:STOP\n";

const FAKE_IMPACT: &str = "#!/bin/sh\n\
    test -f ImpactT.in || { echo 'missing ImpactT.in' >&2; exit 7; }\n\
    test -f rfdata1 || { echo 'missing rfdata1' >&2; exit 8; }\n\
    echo 'Start simulation'\n\
    printf '0.0 0.0 1.5 0.25 0.7 1e-3 0.01\\n1e-12 1e-4 1.6 0.3 0.72 1e-3 0.02\\n' > fort.18\n\
    printf '1 2 3 4 5 6\\n6 5 4 3 2 1\\n0 0 0 0 0 1\\n' > fort.50\n\
    printf '0 0 0 0 0 1\\n' > fort.101\n\
    printf '0.1 10 2.0 1e-6 1e-6 1.0 0.01\\n' > fort.60\n\
    echo 'End simulation'\n";

fn scratch(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "impact_e2e_{}_{}_{}",
        tag,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    fs::create_dir_all(&dir).expect("scratch dir");
    dir
}

fn write_executable(path: &Path, body: &str) {
    fs::write(path, body).expect("script");
    let mut perms = fs::metadata(path).expect("meta").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("chmod");
}

fn write_deck(dir: &Path) -> PathBuf {
    let input = dir.join("ImpactT.in");
    fs::write(&input, INPUT).expect("input");
    fs::write(dir.join("rfdata1"), "0.0 1.0\n0.5 2.0\n1.0 1.0\n").expect("fieldmap");
    fs::write(dir.join("partcl.data"), "3\n1 1 1 1 1 1\n2 2 2 2 2 2\n3 3 3 3 3 3\n").expect("particles");
    input
}

#[test]
fn streaming_run_writes_inputs_executes_and_ingests() {
    let root = scratch("stream");
    let deck = root.join("deck");
    fs::create_dir_all(&deck).expect("deck dir");
    let input = write_deck(&deck);
    let bin = root.join("fake_impact");
    write_executable(&bin, FAKE_IMPACT);

    let config = RunConfig {
        impact_bin: bin.to_string_lossy().to_string(),
        workdir: Some(root.join("work")),
        ..RunConfig::default()
    };
    let cwd_before = std::env::current_dir().expect("cwd");
    let (mut run, warnings) = ImpactRun::from_input_file(&input, config).expect("load");
    assert!(warnings.is_empty(), "{:?}", warnings);
    assert_eq!(run.state(), RunState::Configured);

    let fp_before = run.fingerprint().expect("fingerprint");
    let outcome = run.run();
    assert_eq!(outcome, RunOutcome::Succeeded, "{:?}", run.run_info());
    assert_eq!(run.state(), RunState::Finished);
    assert_eq!(std::env::current_dir().expect("cwd"), cwd_before);

    let info = run.run_info().expect("run info");
    assert!(!info.error);
    assert_eq!(info.why_run_error, "");
    assert_eq!(run.log, vec!["Start simulation", "End simulation"]);

    let ws = run.path().expect("workspace").to_path_buf();
    let staged = fs::read_to_string(ws.join("partcl.data")).expect("staged");
    assert_eq!(staged.lines().count(), 4);
    assert!(fs::read_to_string(ws.join("run")).expect("run file").contains("fake_impact"));

    assert_eq!(run.output.stats["mean_gamma"], vec![1.5, 1.6]);
    assert!(run.output.slice_info.contains_key("initial"));
    let keys: Vec<&str> = run.particles.keys().map(|s| s.as_str()).collect();
    assert_eq!(keys, vec!["WB", "final_particles"]);

    let archive = root.join("run.zip");
    let entries = run.archive(&archive).expect("archive");
    assert!(entries.contains(&"input/fieldmaps/rfdata1.json".to_string()));
    assert!(entries.contains(&"particles/WB.json".to_string()));
    let mut zip = zip::ZipArchive::new(fs::File::open(&archive).expect("open")).expect("zip");
    let mut files = String::new();
    zip.by_name("input/files.json")
        .expect("files entry")
        .read_to_string(&mut files)
        .expect("read");
    assert!(files.contains("ImpactT.in"));
    assert!(files.contains("fort.18"));

    // Reloading the same deck gives the same identity.
    let (again, _) = ImpactRun::from_input_file(&input, RunConfig::default()).expect("reload");
    assert_eq!(again.fingerprint().expect("fingerprint"), fp_before);
    drop(again);

    drop(run);
    assert!(!ws.exists());
    let _ = fs::remove_dir_all(root);
}

#[test]
fn streaming_non_zero_exit_is_recorded() {
    let root = scratch("exit");
    let input = write_deck(&root);
    let bin = root.join("failing_impact");
    write_executable(&bin, "#!/bin/sh\necho 'partial'\nexit 3\n");

    let config = RunConfig {
        impact_bin: bin.to_string_lossy().to_string(),
        workdir: Some(root.join("work")),
        ..RunConfig::default()
    };
    let (mut run, _) = ImpactRun::from_input_file(&input, config).expect("load");
    match run.run() {
        RunOutcome::Failed(why) => assert!(why.contains("code 3"), "{}", why),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(run.log, vec!["partial"]);
    assert_eq!(run.state(), RunState::Finished);
    drop(run);
    let _ = fs::remove_dir_all(root);
}

#[test]
fn bounded_run_times_out_without_raising() {
    let root = scratch("timeout");
    let input = write_deck(&root);
    let bin = root.join("slow_impact");
    write_executable(&bin, "#!/bin/sh\nexec sleep 5\n");

    let config = RunConfig {
        impact_bin: bin.to_string_lossy().to_string(),
        workdir: Some(root.join("work")),
        timeout_seconds: Some(0.001),
        ..RunConfig::default()
    };
    let (mut run, _) = ImpactRun::from_input_file(&input, config).expect("load");
    assert_eq!(run.run(), RunOutcome::Failed("timeout".to_string()));
    let info = run.run_info().expect("info");
    assert!(info.error);
    assert_eq!(info.why_run_error, "timeout");
    assert!(info.run_time < 4.0);
    drop(run);
    let _ = fs::remove_dir_all(root);
}
