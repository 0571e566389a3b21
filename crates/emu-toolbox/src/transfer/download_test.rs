//! Download engine tests against the virtual device.

use std::fs;
use std::path::Path;
use std::time::Duration;

use super::{DownloadJob, ReadMode, TickOutcome, TransferSummary};
use crate::collaborators::{DuplicateChoice, NoTypeSniffer, NullProgress, TypeSniffer};
use crate::error::ToolboxError;
use crate::listing::DirectoryEntry;
use crate::scsi::commands::opcode;
use crate::scsi::{DeviceId, Executor};
use crate::test_support::{RecordingProgress, RecordingSniffer, ScriptedPrompter, init_logging, pattern};
use crate::validation::ValidationError;
use crate::virtual_device::{Fault, VirtualDevice};

fn id() -> DeviceId {
    DeviceId::new(2).unwrap()
}

fn entry(index: u8, name: &str, size: usize) -> DirectoryEntry {
    DirectoryEntry {
        device_index: index,
        is_file: true,
        name: name.to_string(),
        size_bytes: size as u32,
    }
}

fn executor(device: &VirtualDevice) -> Executor {
    Executor::new(Box::new(device.clone()), Duration::from_millis(100))
}

fn start(entries: Vec<DirectoryEntry>, dest: &Path, mode: ReadMode) -> DownloadJob {
    DownloadJob::start(
        id(),
        entries,
        dest,
        mode,
        &mut ScriptedPrompter::default(),
        &mut NullProgress,
    )
    .unwrap()
}

/// Ticks until the job finishes, returning the summary and the number of ticks it took.
fn run(job: &mut DownloadJob, exec: &mut Executor, sniffer: &mut dyn TypeSniffer) -> (TransferSummary, usize) {
    for ticks in 1..1000 {
        if let TickOutcome::Finished(summary) = job.tick(exec, &mut NullProgress, sniffer).unwrap() {
            return (summary, ticks);
        }
    }
    panic!("download never finished");
}

/// Offset field (bytes 2-5) of every READ FILE the device saw, with its batch byte.
fn reads(device: &VirtualDevice) -> Vec<(u32, u8)> {
    device
        .commands()
        .iter()
        .filter(|c| c[0] == opcode::READ_FILE)
        .map(|c| (u32::from_be_bytes([c[2], c[3], c[4], c[5]]), c[6]))
        .collect()
}

#[test]
fn test_downloads_exact_contents_and_sizes() {
    init_logging();
    let big = pattern(5000);
    let device = VirtualDevice::new(id())
        .with_file(0, "Big.bin", &big)
        .with_file(1, "Empty", b"");
    let mut exec = executor(&device);
    let dest = tempfile::tempdir().unwrap();

    let mut job = start(
        vec![entry(0, "Big.bin", 5000), entry(1, "Empty", 0)],
        dest.path(),
        ReadMode::Legacy,
    );
    assert_eq!(job.progress().chunks_total, 3);

    let (summary, ticks) = run(&mut job, &mut exec, &mut NoTypeSniffer);
    // open + 2 reads, open + empty read, finish
    assert_eq!(ticks, 6);
    assert_eq!(summary.files, 2);
    assert_eq!(summary.bytes, 5000);

    assert_eq!(fs::read(dest.path().join("Big.bin")).unwrap(), big);
    assert_eq!(fs::metadata(dest.path().join("Empty")).unwrap().len(), 0);
    // The empty file needs no device I/O
    assert_eq!(reads(&device), vec![(0, 0), (1, 0)]);
}

#[test]
fn test_batched_reads_use_block_count_and_trim_tail() {
    init_logging();
    let data = pattern(20_000);
    let device = VirtualDevice::new(id()).with_file(3, "Game.sit", &data);
    let mut exec = executor(&device);
    let dest = tempfile::tempdir().unwrap();

    let mut job = start(vec![entry(3, "Game.sit", 20_000)], dest.path(), ReadMode::Batched { blocks: 4 });
    assert_eq!(job.progress().chunks_total, 2);
    run(&mut job, &mut exec, &mut NoTypeSniffer);

    assert_eq!(reads(&device), vec![(0, 4), (4, 1)]);
    let written = fs::read(dest.path().join("Game.sit")).unwrap();
    assert_eq!(written.len(), 20_000);
    assert_eq!(written, data);
}

#[test]
fn test_cancel_mid_file_leaves_no_file() {
    init_logging();
    let device = VirtualDevice::new(id()).with_file(0, "Partial", &pattern(10_000));
    let mut exec = executor(&device);
    let dest = tempfile::tempdir().unwrap();
    let target = dest.path().join("Partial");

    let mut job = start(vec![entry(0, "Partial", 10_000)], dest.path(), ReadMode::Legacy);
    job.tick(&mut exec, &mut NullProgress, &mut NoTypeSniffer).unwrap();
    job.tick(&mut exec, &mut NullProgress, &mut NoTypeSniffer).unwrap();
    assert!(target.exists());

    job.cancel();
    assert!(!target.exists());

    // Idempotent, and the job is over
    job.cancel();
    assert!(matches!(
        job.tick(&mut exec, &mut NullProgress, &mut NoTypeSniffer).unwrap(),
        TickOutcome::Finished(_)
    ));
}

#[test]
fn test_dropping_job_mid_file_removes_partial() {
    let device = VirtualDevice::new(id()).with_file(0, "Dropped", &pattern(9000));
    let mut exec = executor(&device);
    let dest = tempfile::tempdir().unwrap();

    {
        let mut job = start(vec![entry(0, "Dropped", 9000)], dest.path(), ReadMode::Legacy);
        job.tick(&mut exec, &mut NullProgress, &mut NoTypeSniffer).unwrap();
        job.tick(&mut exec, &mut NullProgress, &mut NoTypeSniffer).unwrap();
    }
    assert!(!dest.path().join("Dropped").exists());
}

#[test]
fn test_skip_all_drops_every_collision() {
    init_logging();
    let dest = tempfile::tempdir().unwrap();
    fs::write(dest.path().join("readme.txt"), b"keep me").unwrap();
    fs::write(dest.path().join("DATA.BIN"), b"keep me too").unwrap();

    let device = VirtualDevice::new(id())
        .with_file(0, "README.TXT", b"device readme")
        .with_file(1, "data.bin", b"device data")
        .with_file(2, "new.txt", b"fresh");
    let mut exec = executor(&device);

    let mut prompter = ScriptedPrompter::answering(DuplicateChoice::SkipAll);
    let entries = vec![
        entry(0, "README.TXT", 13),
        entry(1, "data.bin", 11),
        entry(2, "new.txt", 5),
    ];
    let mut job = DownloadJob::start(id(), entries, dest.path(), ReadMode::Legacy, &mut prompter, &mut NullProgress).unwrap();

    // 3 selected, 2 collisions
    assert_eq!(job.queued(), 1);
    assert_eq!(
        prompter.log.lock().unwrap().duplicates,
        vec![vec!["README.TXT".to_string(), "data.bin".to_string()]]
    );

    let (summary, _) = run(&mut job, &mut exec, &mut NoTypeSniffer);
    assert_eq!(summary.files, 1);
    assert_eq!(fs::read(dest.path().join("readme.txt")).unwrap(), b"keep me");
    assert_eq!(fs::read(dest.path().join("DATA.BIN")).unwrap(), b"keep me too");
    assert_eq!(fs::read(dest.path().join("new.txt")).unwrap(), b"fresh");
}

#[test]
fn test_overwrite_all_replaces_existing_file() {
    let dest = tempfile::tempdir().unwrap();
    fs::write(dest.path().join("Notes"), b"a much longer older version").unwrap();

    let device = VirtualDevice::new(id()).with_file(0, "Notes", b"new");
    let mut exec = executor(&device);
    let mut prompter = ScriptedPrompter::answering(DuplicateChoice::OverwriteAll);

    let mut job = DownloadJob::start(
        id(),
        vec![entry(0, "Notes", 3)],
        dest.path(),
        ReadMode::Legacy,
        &mut prompter,
        &mut NullProgress,
    )
    .unwrap();
    assert_eq!(job.queued(), 1);
    run(&mut job, &mut exec, &mut NoTypeSniffer);

    assert_eq!(fs::read(dest.path().join("Notes")).unwrap(), b"new");
}

#[test]
fn test_cancel_choice_declines_start() {
    let dest = tempfile::tempdir().unwrap();
    fs::write(dest.path().join("Notes"), b"old").unwrap();
    let mut prompter = ScriptedPrompter::answering(DuplicateChoice::Cancel);

    let result = DownloadJob::start(
        id(),
        vec![entry(0, "notes", 3)],
        dest.path(),
        ReadMode::Legacy,
        &mut prompter,
        &mut NullProgress,
    );
    assert!(matches!(result, Err(ToolboxError::UserDeclined)));
    assert_eq!(fs::read(dest.path().join("Notes")).unwrap(), b"old");
}

#[test]
fn test_no_prompt_without_collisions() {
    let dest = tempfile::tempdir().unwrap();
    fs::write(dest.path().join("Other"), b"x").unwrap();
    let mut prompter = ScriptedPrompter::default();

    DownloadJob::start(
        id(),
        vec![entry(0, "Notes", 3)],
        dest.path(),
        ReadMode::Legacy,
        &mut prompter,
        &mut NullProgress,
    )
    .unwrap();
    assert!(prompter.log.lock().unwrap().duplicates.is_empty());
}

#[test]
fn test_unsafe_local_name_rejected() {
    let dest = tempfile::tempdir().unwrap();
    let result = DownloadJob::start(
        id(),
        vec![entry(0, "fine", 1), entry(1, "..", 1)],
        dest.path(),
        ReadMode::Legacy,
        &mut ScriptedPrompter::default(),
        &mut NullProgress,
    );
    assert!(matches!(
        result,
        Err(ToolboxError::Validation {
            error: ValidationError::NotAPathComponent { .. }
        })
    ));
    assert_eq!(fs::read_dir(dest.path()).unwrap().count(), 0);
}

#[test]
fn test_device_error_aborts_job_and_deletes_partial() {
    init_logging();
    let device = VirtualDevice::new(id())
        .with_file(0, "First", &pattern(12_000))
        .with_file(1, "Second", b"never");
    device.inject_after(
        opcode::READ_FILE,
        1,
        Fault::CheckCondition {
            key: 0x03,
            asc: 0x11,
            ascq: 0x00,
        },
    );
    let mut exec = executor(&device);
    let dest = tempfile::tempdir().unwrap();

    let mut job = start(vec![entry(0, "First", 12_000), entry(1, "Second", 5)], dest.path(), ReadMode::Legacy);
    job.tick(&mut exec, &mut NullProgress, &mut NoTypeSniffer).unwrap();
    job.tick(&mut exec, &mut NullProgress, &mut NoTypeSniffer).unwrap();
    let err = job.tick(&mut exec, &mut NullProgress, &mut NoTypeSniffer).unwrap_err();

    match err {
        ToolboxError::DeviceStatus { code, sense, .. } => {
            assert_eq!(code, 0x0006_0002);
            assert_eq!(sense.map(|s| s.asc), Some(0x11));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!dest.path().join("First").exists());
    assert!(!dest.path().join("Second").exists());
    assert_eq!(job.queued(), 0);
    assert!(matches!(
        job.tick(&mut exec, &mut NullProgress, &mut NoTypeSniffer).unwrap(),
        TickOutcome::Finished(_)
    ));
}

#[test]
fn test_progress_reports_total_and_reaches_hundred() {
    let device = VirtualDevice::new(id())
        .with_file(0, "A", &pattern(4097))
        .with_file(1, "B", b"b");
    let mut exec = executor(&device);
    let dest = tempfile::tempdir().unwrap();
    let mut progress = RecordingProgress::default();

    let mut job = DownloadJob::start(
        id(),
        vec![entry(0, "A", 4097), entry(1, "B", 1)],
        dest.path(),
        ReadMode::Legacy,
        &mut ScriptedPrompter::default(),
        &mut progress,
    )
    .unwrap();
    while let TickOutcome::Continue = job.tick(&mut exec, &mut progress, &mut NoTypeSniffer).unwrap() {}

    let log = progress.0.lock().unwrap();
    assert_eq!(log.totals, vec![3]);
    assert_eq!(log.percents, vec![0, 33, 66, 100]);
    assert_eq!(log.names, vec!["A".to_string(), "B".to_string()]);
}

#[test]
fn test_sniffer_sees_only_first_chunk() {
    let device = VirtualDevice::new(id()).with_file(0, "Letter", &pattern(9000));
    let mut exec = executor(&device);
    let dest = tempfile::tempdir().unwrap();
    let mut sniffer = RecordingSniffer::default();

    let mut job = start(vec![entry(0, "Letter", 9000)], dest.path(), ReadMode::Legacy);
    // Finder info may not be supported by the temp filesystem; that must not fail the job
    let (summary, _) = run(&mut job, &mut exec, &mut sniffer);

    assert_eq!(summary.files, 1);
    assert_eq!(*sniffer.0.lock().unwrap(), vec![("Letter".to_string(), 4096)]);
}
