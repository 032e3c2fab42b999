//! End-to-end bridge runs against a mock platform and a fake builder.
//!
//! Run with: cargo test --package cryoatom-builder --test test_bridge_pipeline

use cryoatom_accel::{TelemetrySource, VisibleDevices};
use cryoatom_builder::{BridgePipeline, BuilderCommand, BuilderRunner, PipelineOptions};
use cryoatom_common::{CryoAtomError, JobOutputs, OutputRow};
use cryoatom_test_utils::{
    fake_builder, relative_to_cwd, FakeBuild, MockPlatformSession, StaticTelemetry,
    UnavailableTelemetry,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;

const TELEMETRY: &str = "0, 20000, 24576, 80\n1, 1024, 24576, 5\n2, 0, 24576, 0\n";

struct Fixture {
    _tmp: tempfile::TempDir,
    root: std::path::PathBuf,
    fasta: std::path::PathBuf,
}

/// Project directory with a sharpened and a plain map under J44.
fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().to_path_buf();
    std::fs::create_dir_all(root.join("J44")).unwrap();
    std::fs::write(root.join("J44/J44_map.mrc"), b"plain").unwrap();
    std::fs::write(root.join("J44/J44_map_sharp.mrc"), b"sharp").unwrap();
    let fasta = root.join("WT_GLP-1R.fasta");
    std::fs::write(&fasta, ">GLP1R\nMAGAPGPLRLALLLLGMVGRAGP\n").unwrap();
    Fixture { _tmp: tmp, root, fasta }
}

fn outputs() -> JobOutputs {
    JobOutputs::new()
        .with_field("map/path", vec![OutputRow::with_path("J44/J44_map.mrc")])
        .with_field("map_sharp/path", vec![OutputRow::with_path("J44/J44_map_sharp.mrc")])
}

fn runner(dir: &Path, kind: FakeBuild) -> BuilderRunner {
    let fake = fake_builder(dir, kind);
    BuilderRunner::new(BuilderCommand {
        executable: fake.executable,
        leading_args: fake.leading_args,
        ..BuilderCommand::default()
    })
}

fn pipeline(
    session: Arc<MockPlatformSession>,
    telemetry: Arc<dyn TelemetrySource>,
    dir: &Path,
    kind: FakeBuild,
) -> BridgePipeline {
    BridgePipeline::new(session, telemetry, runner(dir, kind))
}

#[tokio::test]
async fn test_full_run_publishes_model_and_logs() {
    let fx = fixture();
    let session = Arc::new(MockPlatformSession::new(&fx.root).with_outputs(outputs()));
    let pipeline = pipeline(
        session.clone(),
        Arc::new(StaticTelemetry::new(TELEMETRY)),
        &fx.root,
        FakeBuild::Success,
    );

    let opts = PipelineOptions::new("P164", "J44", &fx.fasta);
    let report = pipeline.run(&opts).await.unwrap();

    // least-loaded device wins
    assert_eq!(report.accelerator_index, 2);
    // sharpened map preferred
    assert_eq!(report.artifact.field_name, "map_sharp/path");
    assert_eq!(report.work_dir, fx.root.join("cryoatom_P164_J44"));

    let staged_map = report.work_dir.join("input_map.mrc");
    assert_eq!(std::fs::read(staged_map).unwrap(), b"sharp");
    assert!(report.work_dir.join("input.fasta").is_file());

    let dest = fx.root.join("J44/cryoatom/P164_J44_cryoatom.cif");
    assert_eq!(report.publish.destination, dest);
    assert!(report.publish.copied);
    assert!(report.publish.logged);
    assert_eq!(
        std::fs::read(&dest).unwrap(),
        std::fs::read(&report.build.output_model_path).unwrap()
    );

    let logs = session.logged_lines();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].0, "J44");
    assert!(logs[0].1.contains("GPU 2"));
    assert!(logs[0].1.contains("P164_J44_cryoatom.cif"));
}

#[tokio::test]
async fn test_manual_gpu_skips_telemetry() {
    let fx = fixture();
    let session = Arc::new(MockPlatformSession::new(&fx.root).with_outputs(outputs()));
    let pipeline = pipeline(session, Arc::new(UnavailableTelemetry), &fx.root, FakeBuild::Success);

    let mut opts = PipelineOptions::new("P164", "J44", &fx.fasta);
    opts.accelerator = Some(7);
    let report = pipeline.run(&opts).await.unwrap();

    assert_eq!(report.accelerator_index, 7);
    let args = std::fs::read_to_string(report.work_dir.join("args.txt")).unwrap();
    assert!(args.contains("-d cuda:0"));
    let device = std::fs::read_to_string(report.work_dir.join("device.txt")).unwrap();
    assert_eq!(device.trim(), "7");
}

#[tokio::test]
async fn test_visible_devices_limit_automatic_choice() {
    let fx = fixture();
    let session = Arc::new(MockPlatformSession::new(&fx.root).with_outputs(outputs()));
    let pipeline = pipeline(
        session,
        Arc::new(StaticTelemetry::new(TELEMETRY)),
        &fx.root,
        FakeBuild::Success,
    )
    .with_visible_devices(VisibleDevices::parse("0,1"));

    let report = pipeline
        .run(&PipelineOptions::new("P164", "J44", &fx.fasta))
        .await
        .unwrap();
    assert_eq!(report.accelerator_index, 1);
}

#[tokio::test]
async fn test_builder_addresses_visible_device_by_physical_index() {
    let fx = fixture();
    let session = Arc::new(MockPlatformSession::new(&fx.root).with_outputs(outputs()));
    let telemetry = "0, 0, 24576, 0\n1, 0, 24576, 0\n2, 20000, 24576, 90\n3, 512, 24576, 2\n";
    let pipeline = pipeline(
        session,
        Arc::new(StaticTelemetry::new(telemetry)),
        &fx.root,
        FakeBuild::Success,
    )
    .with_visible_devices(VisibleDevices::parse("2,3"));

    let report = pipeline
        .run(&PipelineOptions::new("P164", "J44", &fx.fasta))
        .await
        .unwrap();
    assert_eq!(report.accelerator_index, 3);

    let args = std::fs::read_to_string(report.work_dir.join("args.txt")).unwrap();
    assert!(args.contains("-d cuda:0"));
    let device = std::fs::read_to_string(report.work_dir.join("device.txt")).unwrap();
    assert_eq!(device.trim(), "3");
}

#[tokio::test]
async fn test_relative_out_dir_is_used_from_current_directory() {
    let fx = fixture();
    let session = Arc::new(MockPlatformSession::new(&fx.root).with_outputs(outputs()));
    let pipeline = pipeline(
        session,
        Arc::new(StaticTelemetry::new(TELEMETRY)),
        &fx.root,
        FakeBuild::Success,
    );

    let mut opts = PipelineOptions::new("P164", "J44", &fx.fasta);
    opts.out_dir = Some(relative_to_cwd(&fx.root.join("run")));
    let report = pipeline.run(&opts).await.unwrap();

    assert!(report.work_dir.is_absolute());
    assert!(fx.root.join("run/out/out.cif").is_file());
    assert!(!fx.root.join("run/run").exists());
    assert!(report.publish.destination.is_file());
}

#[tokio::test]
async fn test_rerun_without_new_model_does_not_republish_old_one() {
    let fx = fixture();
    let session = Arc::new(MockPlatformSession::new(&fx.root).with_outputs(outputs()));
    let opts = PipelineOptions::new("P164", "J44", &fx.fasta);

    let first = pipeline(
        session.clone(),
        Arc::new(StaticTelemetry::new(TELEMETRY)),
        &fx.root,
        FakeBuild::Success,
    );
    first.run(&opts).await.unwrap();

    let second = pipeline(
        session.clone(),
        Arc::new(StaticTelemetry::new(TELEMETRY)),
        &fx.root,
        FakeBuild::NoOutput,
    );
    let err = second.run(&opts).await.unwrap_err();
    assert!(matches!(err, CryoAtomError::ModelNotFound(_)));
    assert_eq!(session.logged_lines().len(), 1);
}

#[tokio::test]
async fn test_explicit_map_field_and_no_copy() {
    let fx = fixture();
    let session = Arc::new(MockPlatformSession::new(&fx.root).with_outputs(outputs()));
    let pipeline = pipeline(
        session,
        Arc::new(StaticTelemetry::new(TELEMETRY)),
        &fx.root,
        FakeBuild::Success,
    );

    let mut opts = PipelineOptions::new("P164", "J44", &fx.fasta);
    opts.map_field = Some("map/path".to_string());
    opts.copy_map = false;
    opts.out_dir = Some(fx.root.join("custom_run"));
    let report = pipeline.run(&opts).await.unwrap();

    assert_eq!(report.artifact.field_name, "map/path");
    assert_eq!(report.work_dir, fx.root.join("custom_run"));
    assert!(!report.work_dir.join("input_map.mrc").exists());

    let args = std::fs::read_to_string(report.work_dir.join("args.txt")).unwrap();
    assert!(args.contains(&report.map_path.display().to_string()));
}

#[tokio::test]
async fn test_missing_artifact_aborts_before_build() {
    let fx = fixture();
    let outputs = JobOutputs::new().with_field("map/path", vec![OutputRow::empty()]);
    let session = Arc::new(MockPlatformSession::new(&fx.root).with_outputs(outputs));
    let pipeline = pipeline(
        session.clone(),
        Arc::new(StaticTelemetry::new(TELEMETRY)),
        &fx.root,
        FakeBuild::Success,
    );

    let err = pipeline
        .run(&PipelineOptions::new("P164", "J44", &fx.fasta))
        .await
        .unwrap_err();
    assert!(matches!(err, CryoAtomError::ArtifactNotFound(_)));
    assert!(!fx.root.join("cryoatom_P164_J44").exists());
    assert!(session.logged_lines().is_empty());
}

#[tokio::test]
async fn test_builder_failure_is_surfaced_and_nothing_published() {
    let fx = fixture();
    let session = Arc::new(MockPlatformSession::new(&fx.root).with_outputs(outputs()));
    let pipeline = pipeline(
        session.clone(),
        Arc::new(StaticTelemetry::new(TELEMETRY)),
        &fx.root,
        FakeBuild::Fail,
    );

    let err = pipeline
        .run(&PipelineOptions::new("P164", "J44", &fx.fasta))
        .await
        .unwrap_err();
    match err {
        CryoAtomError::BuildProcessFailed { code, stderr } => {
            assert_eq!(code, Some(3));
            assert!(stderr.contains("CUDA out of memory"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!fx.root.join("J44/cryoatom").exists());
    assert!(session.logged_lines().is_empty());
}

#[tokio::test]
async fn test_log_failure_still_reports_copy() {
    let fx = fixture();
    let session = Arc::new(
        MockPlatformSession::new(&fx.root)
            .with_outputs(outputs())
            .failing_log(),
    );
    let pipeline = pipeline(
        session,
        Arc::new(StaticTelemetry::new(TELEMETRY)),
        &fx.root,
        FakeBuild::Success,
    );

    let report = pipeline
        .run(&PipelineOptions::new("P164", "J44", &fx.fasta))
        .await
        .unwrap();
    assert!(report.publish.copied);
    assert!(!report.publish.logged);
    assert!(report.publish.destination.is_file());
}
