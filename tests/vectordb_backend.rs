mod common;

use std::sync::{Arc, Mutex};

use mediastore::vectordb::{server, Engine, VectorDbConnectionProvider, HOST_PARAMETER, PATH_PARAMETER, PORT_PARAMETER};
use mediastore::{Connection, ConnectionProvider, Error, Parameters};
use tempfile::TempDir;

fn embedded(dir: &TempDir) -> Arc<dyn Connection> {
    let parameters = Parameters::new().with(PATH_PARAMETER, dir.path().display());
    VectorDbConnectionProvider::with_kinds(common::kinds()).open("media", &parameters).unwrap()
}

#[test]
fn test_embedded_conformance() {
    let dirs = Mutex::new(Vec::new());
    common::conformance(|| {
        let dir = TempDir::new().unwrap();
        let connection = embedded(&dir);
        dirs.lock().unwrap().push(dir);
        (connection, common::schema("media"))
    });
}

#[test]
fn test_tcp_conformance() {
    let dirs = Mutex::new(Vec::new());
    common::conformance(|| {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(Engine::open(dir.path(), false).unwrap());
        let addr = server::spawn(engine, "127.0.0.1:0").unwrap();
        dirs.lock().unwrap().push(dir);
        let parameters = Parameters::new()
            .with(HOST_PARAMETER, addr.ip())
            .with(PORT_PARAMETER, addr.port());
        let connection = VectorDbConnectionProvider::with_kinds(common::kinds()).open("media", &parameters).unwrap();
        (connection, common::schema("media"))
    });
}

#[test]
fn test_open_fails_without_server() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let parameters = Parameters::new().with(PORT_PARAMETER, port);
    let opened = VectorDbConnectionProvider::new().open("media", &parameters);
    assert!(matches!(opened, Err(Error::Io { .. }) | Err(Error::Rpc(_))));
}

#[test]
fn test_embedded_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let schema = common::schema("media");
    let owner = {
        let connection = embedded(&dir);
        connection.initialize(&schema).unwrap();
        let owner = common::segments(connection.as_ref(), 1)[0];
        let writer = connection.descriptor_writer(schema.field(common::CLIP).unwrap()).unwrap();
        assert!(writer.add(&common::clip(owner, [0.1, 0.2, 0.3])).unwrap());
        owner
    };

    let connection = embedded(&dir);
    assert!(connection.retrievable_reader().exists(owner).unwrap());
    let reader = connection.descriptor_reader(schema.field(common::CLIP).unwrap()).unwrap();
    let stored: Vec<_> = reader.get_for_retrievable(owner).unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(stored.len(), 1);
}
