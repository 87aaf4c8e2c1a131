use std::fs;
use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;

fn cli() -> Command {
    Command::new(env!("CARGO_BIN_EXE_spikedetekt_cli"))
}

fn temp_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("spikedetekt_cli_{}_{}", std::process::id(), name))
}

fn synth(dat: &PathBuf, truth: &PathBuf) {
    let output = cli()
        .args([
            "synth",
            "--output",
            dat.to_str().unwrap(),
            "--truth",
            truth.to_str().unwrap(),
            "--channels",
            "4",
            "--duration",
            "2",
            "--spikes",
            "8",
        ])
        .output()
        .expect("failed to run spikedetekt_cli synth");
    assert!(
        output.status.success(),
        "synth exited with {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn synth_then_detect_finds_every_spike() {
    let dat = temp_file("detect.dat");
    let truth_path = temp_file("detect.truth.json");
    let spikes_path = temp_file("detect.jsonl");
    let config_path = temp_file("detect.config.json");
    synth(&dat, &truth_path);
    fs::write(
        &config_path,
        r#"{"filter_high": 6000.0, "threshold_strong_multiplier": 8.0, "threshold_weak_multiplier": 4.0}"#,
    )
    .unwrap();

    let output = cli()
        .args([
            "detect",
            "--input",
            dat.to_str().unwrap(),
            "--channels",
            "4",
            "--config",
            config_path.to_str().unwrap(),
            "--output",
            spikes_path.to_str().unwrap(),
        ])
        .output()
        .expect("failed to run spikedetekt_cli detect");
    assert!(
        output.status.success(),
        "detect exited with {:?}: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stderr)
    );

    let summary: Value = serde_json::from_slice(&output.stdout).expect("summary JSON");
    assert_eq!(summary["output"]["spikes"], 8);
    assert_eq!(summary["n_channels"], 4);

    let truth: Value = serde_json::from_str(&fs::read_to_string(&truth_path).unwrap()).unwrap();
    let expected: Vec<f64> = truth["spikes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["time"].as_f64().unwrap())
        .collect();
    let found: Vec<f64> = fs::read_to_string(&spikes_path)
        .unwrap()
        .lines()
        .map(|line| {
            let record: Value = serde_json::from_str(line).unwrap();
            record["time_samples"].as_f64().unwrap()
        })
        .collect();
    assert_eq!(found.len(), expected.len());
    for (f, e) in found.iter().zip(expected.iter()) {
        assert!((f - e).abs() <= 1.0, "expected {} got {}", e, f);
    }

    for path in [&dat, &truth_path, &spikes_path, &config_path] {
        fs::remove_file(path).ok();
    }
}

#[test]
fn calibrate_prints_thresholds() {
    let dat = temp_file("calibrate.dat");
    let truth_path = temp_file("calibrate.truth.json");
    synth(&dat, &truth_path);

    let output = cli()
        .args([
            "calibrate",
            "--input",
            dat.to_str().unwrap(),
            "--channels",
            "4",
        ])
        .output()
        .expect("failed to run spikedetekt_cli calibrate");
    assert!(output.status.success());

    let report: Value = serde_json::from_slice(&output.stdout).expect("calibration JSON");
    assert_eq!(report["n_channels"], 4);
    let strong = report["threshold"]["strong"].as_array().unwrap();
    let weak = report["threshold"]["weak"].as_array().unwrap();
    assert_eq!(strong.len(), 4);
    for (s, w) in strong.iter().zip(weak.iter()) {
        assert!(s.as_f64().unwrap() > w.as_f64().unwrap());
    }

    fs::remove_file(&dat).ok();
    fs::remove_file(&truth_path).ok();
}

#[test]
fn raw_input_without_channels_fails() {
    let output = cli()
        .args(["detect", "--input", "/nonexistent/recording.dat"])
        .output()
        .expect("failed to run spikedetekt_cli detect");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).expect("stderr UTF-8");
    assert!(stderr.contains("--channels"), "stderr: {stderr}");
}
