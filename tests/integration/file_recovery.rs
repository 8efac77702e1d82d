#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use stratum::backend::FileStore;
use stratum::{
    BackendConfig, CommitMode, NodeKey, ResourceConfig, Revision, Revisioning, Session,
};
use tempfile::tempdir;

fn data_file(dir: &Path) -> std::path::PathBuf {
    dir.join("pages.dat")
}

fn commit_values(session: &Session, values: &[(u64, &str)]) -> Revision {
    let mut tx = session.begin_write().unwrap();
    for (key, value) in values {
        tx.set(NodeKey(*key), value.as_bytes().to_vec()).unwrap();
    }
    let revision = tx.commit().unwrap();
    drop(tx);
    session.wait_for_commits().unwrap();
    revision
}

#[test]
fn reopen_sees_every_committed_revision() {
    let dir = tempdir().unwrap();
    let config = ResourceConfig::file(dir.path())
        .with_revisioning(Revisioning::SlidingSnapshot, 3)
        .with_commit(CommitMode::NonBlocking);
    let session = Session::create(config).unwrap();
    for round in 0..8u64 {
        commit_values(&session, &[(round % 3, &format!("v{round}"))]);
    }
    session.close().unwrap();

    let session = Session::open(dir.path()).unwrap();
    assert_eq!(session.latest_revision().unwrap(), Revision(8));
    assert_eq!(session.config().revisioning, Revisioning::SlidingSnapshot);
    for revision in 1..=8u64 {
        let read = session.begin_read_at(Revision(revision)).unwrap();
        let newest = revision - 1;
        let expected = format!("v{newest}");
        assert_eq!(
            read.get(NodeKey(newest % 3)).unwrap().as_deref(),
            Some(expected.as_bytes())
        );
    }
    // keeps writing after reopen
    assert_eq!(commit_values(&session, &[(0, "again")]), Revision(9));
    session.close().unwrap();
}

#[test]
fn torn_uber_frame_falls_back_to_previous_revision() {
    let dir = tempdir().unwrap();
    let session = Session::create(ResourceConfig::file(dir.path())).unwrap();
    commit_values(&session, &[(1, "first")]);
    session.close().unwrap();

    let session = Session::open(dir.path()).unwrap();
    commit_values(&session, &[(1, "second")]);
    session.close().unwrap();

    // the uber page frame is always the last one written
    let path = data_file(dir.path());
    let len = fs::metadata(&path).unwrap().len();
    OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(len - 5)
        .unwrap();

    let session = Session::open(dir.path()).unwrap();
    assert_eq!(session.latest_revision().unwrap(), Revision(1));
    let read = session.begin_read().unwrap();
    assert_eq!(read.get(NodeKey(1)).unwrap().as_deref(), Some(&b"first"[..]));
    drop(read);
    assert_eq!(commit_values(&session, &[(1, "third")]), Revision(2));
    session.close().unwrap();

    let session = Session::open(dir.path()).unwrap();
    let read = session.begin_read().unwrap();
    assert_eq!(read.get(NodeKey(1)).unwrap().as_deref(), Some(&b"third"[..]));
}

#[test]
fn trailing_garbage_is_discarded_on_open() {
    let dir = tempdir().unwrap();
    let session = Session::create(ResourceConfig::file(dir.path())).unwrap();
    commit_values(&session, &[(3, "kept")]);
    session.close().unwrap();

    let path = data_file(dir.path());
    let len = fs::metadata(&path).unwrap().len();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[1, 0, 0, 0, 0, 0, 0, 0, 9, 0xff]).unwrap();
    drop(file);

    let store = FileStore::open(dir.path()).unwrap();
    drop(store);
    assert_eq!(fs::metadata(&path).unwrap().len(), len);

    let session = Session::open(dir.path()).unwrap();
    let read = session.begin_read().unwrap();
    assert_eq!(read.get(NodeKey(3)).unwrap().as_deref(), Some(&b"kept"[..]));
}

#[test]
fn dual_and_object_backends_reopen() {
    let dir = tempdir().unwrap();
    let primary = dir.path().join("primary");
    let mirror = dir.path().join("mirror");
    let config = ResourceConfig {
        backend: BackendConfig::Dual {
            primary: Box::new(BackendConfig::File {
                path: primary.clone(),
            }),
            secondary: Box::new(BackendConfig::Object {
                root: mirror.clone(),
            }),
        },
        ..ResourceConfig::default()
    };
    let session = Session::create(config).unwrap();
    commit_values(&session, &[(0, "zero"), (200, "two hundred")]);
    session.close().unwrap();
    assert!(Session::exists(&primary));

    let session = Session::open(&primary).unwrap();
    let read = session.begin_read().unwrap();
    assert_eq!(read.get(NodeKey(200)).unwrap().as_deref(), Some(&b"two hundred"[..]));
    drop(read);
    session.close().unwrap();

    // the mirror alone holds a complete copy
    let mirror_only = ResourceConfig {
        backend: BackendConfig::Object { root: mirror },
        ..ResourceConfig::default()
    };
    let store = mirror_only.open_store().unwrap();
    let session = Session::open_with_store(mirror_only, store).unwrap();
    assert_eq!(session.latest_revision().unwrap(), Revision(1));
    let read = session.begin_read().unwrap();
    assert_eq!(read.get(NodeKey(0)).unwrap().as_deref(), Some(&b"zero"[..]));
}
