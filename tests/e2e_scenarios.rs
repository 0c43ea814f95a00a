use capturefile::{CaptureError, CaptureFile, CaptureFileOptions};
use tempfile::tempdir;

mod common;

#[test]
fn basic_round_trip_after_reopen() {
    common::trace_init();
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.cap");

    {
        let options = CaptureFileOptions::new().write(true);
        let mut file = CaptureFile::open(&path, &options).unwrap();
        file.add_record(b"r1").unwrap();
        file.add_record(b"r2").unwrap();
        file.add_record(b"r3").unwrap();
        file.commit().unwrap();
    }

    let options = CaptureFileOptions::new().write(false);
    let mut file = CaptureFile::open(&path, &options).unwrap();
    assert_eq!(file.record_count(), 3);
    assert_eq!(file.record_at(2).unwrap(), b"r2");
    assert_eq!(file.record_at(1).unwrap(), b"r1");
    assert_eq!(file.record_at(3).unwrap(), b"r3");
}

#[test]
fn uncommitted_add_is_discarded_on_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.cap");

    {
        let options = CaptureFileOptions::new().write(true);
        let mut file = CaptureFile::open(&path, &options).unwrap();
        file.add_record(b"never committed").unwrap();
        assert_eq!(file.record_count(), 1);
        // dropped without calling commit()
    }

    let options = CaptureFileOptions::new().write(true);
    let file = CaptureFile::open(&path, &options).unwrap();
    assert_eq!(file.record_count(), 0);
}

#[test]
fn metadata_round_trip_and_clear() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.cap");

    {
        let options = CaptureFileOptions::new().write(true);
        let mut file = CaptureFile::open(&path, &options).unwrap();
        file.set_metadata(Some(b"cursor=42")).unwrap();
        file.commit().unwrap();
    }
    {
        let options = CaptureFileOptions::new().write(false);
        let mut file = CaptureFile::open(&path, &options).unwrap();
        assert_eq!(file.get_metadata().unwrap(), Some(b"cursor=42".to_vec()));
    }
    {
        let options = CaptureFileOptions::new().write(true);
        let mut file = CaptureFile::open(&path, &options).unwrap();
        file.set_metadata(None).unwrap();
        file.commit().unwrap();
    }
    let options = CaptureFileOptions::new().write(false);
    let mut file = CaptureFile::open(&path, &options).unwrap();
    assert_eq!(file.get_metadata().unwrap(), None);
}

#[test]
fn readers_observe_commits_only_after_refresh() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.cap");

    {
        let options = CaptureFileOptions::new().write(true);
        CaptureFile::open(&path, &options).unwrap().commit().unwrap();
    }

    let read_options = CaptureFileOptions::new().write(false);
    let mut reader_a = CaptureFile::open(&path, &read_options).unwrap();
    let mut reader_b = CaptureFile::open(&path, &read_options).unwrap();
    assert_eq!(reader_a.record_count(), 0);
    assert_eq!(reader_b.record_count(), 0);

    {
        let write_options = CaptureFileOptions::new().write(true);
        let mut writer = CaptureFile::open(&path, &write_options).unwrap();
        for i in 0..10 {
            writer.add_record(format!("rec-{i}").as_bytes()).unwrap();
        }
        writer.commit().unwrap();
    }

    assert_eq!(reader_a.record_count(), 0);
    assert_eq!(reader_b.record_count(), 0);

    reader_a.refresh().unwrap();
    reader_b.refresh().unwrap();
    assert_eq!(reader_a.record_count(), 10);
    assert_eq!(reader_b.record_count(), 10);
    assert_eq!(reader_a.record_at(1).unwrap(), b"rec-0");
    assert_eq!(reader_b.record_at(10).unwrap(), b"rec-9");
}

#[test]
fn out_of_range_record_numbers_fail() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.cap");

    let options = CaptureFileOptions::new().write(true);
    let mut file = CaptureFile::open(&path, &options).unwrap();
    file.add_record(b"only one").unwrap();
    file.commit().unwrap();

    assert!(matches!(file.record_at(0), Err(CaptureError::OutOfRange)));
    assert!(matches!(file.record_at(2), Err(CaptureError::OutOfRange)));
    assert!(file.record_at(1).is_ok());
}

#[test]
fn force_new_empty_file_truncates_existing_content() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.cap");

    {
        let options = CaptureFileOptions::new().write(true);
        let mut file = CaptureFile::open(&path, &options).unwrap();
        file.add_record(b"old data").unwrap();
        file.commit().unwrap();
    }

    let options = CaptureFileOptions::new().write(true).force_new_empty_file(true);
    let file = CaptureFile::open(&path, &options).unwrap();
    assert_eq!(file.record_count(), 0);
}

#[test]
fn empty_commits_are_permitted_and_advance_state() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.cap");

    let options = CaptureFileOptions::new().write(true);
    let mut file = CaptureFile::open(&path, &options).unwrap();
    file.commit().unwrap();
    file.commit().unwrap();
    assert_eq!(file.record_count(), 0);
}

#[test]
fn second_writer_in_process_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("log.cap");

    let options = CaptureFileOptions::new().write(true);
    let _first = CaptureFile::open(&path, &options).unwrap();
    let second = CaptureFile::open(&path, &options);
    assert!(matches!(second, Err(CaptureError::AlreadyOpen)));
}
