mod common;

use std::sync::{Arc, Mutex};

use mediastore::jsonl::{JsonlConnectionProvider, ROOT_PARAMETER};
use mediastore::{Connection, ConnectionProvider, Error, Parameters};
use tempfile::TempDir;

fn open_in(dir: &TempDir) -> Arc<dyn Connection> {
    let parameters = Parameters::new().with(ROOT_PARAMETER, dir.path().display());
    JsonlConnectionProvider::with_kinds(common::kinds()).open("media", &parameters).unwrap()
}

#[test]
fn test_jsonl_conformance() {
    let dirs = Mutex::new(Vec::new());
    common::conformance(|| {
        let dir = TempDir::new().unwrap();
        let connection = open_in(&dir);
        dirs.lock().unwrap().push(dir);
        (connection, common::schema("media"))
    });
}

#[test]
fn test_open_requires_root() {
    let opened = JsonlConnectionProvider::new().open("media", &Parameters::new());
    assert!(matches!(opened, Err(Error::MissingParameter(_))));
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let schema = common::schema("media");
    let owners = {
        let connection = open_in(&dir);
        connection.initialize(&schema).unwrap();
        let owners = common::segments(connection.as_ref(), 2);
        let writer = connection.descriptor_writer(schema.field(common::CAPTION).unwrap()).unwrap();
        assert!(writer.add(&common::caption(owners[0], "kept")).unwrap());
        owners
    };

    let connection = open_in(&dir);
    assert!(connection.retrievable_reader().exists(owners[1]).unwrap());
    let reader = connection.descriptor_reader(schema.field(common::CAPTION).unwrap()).unwrap();
    assert_eq!(reader.count().unwrap(), 1);
}

#[test]
fn test_transactions_apply_immediately() {
    let dir = TempDir::new().unwrap();
    let connection = open_in(&dir);
    let schema = common::schema("media");
    connection.initialize(&schema).unwrap();
    let failed: mediastore::Result<()> = connection.with_transaction(|c| {
        common::segments(c, 1);
        Err(Error::Rpc("abort".into()))
    });
    assert!(failed.is_err());
    assert_eq!(connection.retrievable_reader().count().unwrap(), 1);
}
