//! Mock construction helpers

use fer::config::DeviceConfig;
use fer::device::DeviceRuntime;
use fer::mq::{Driver, InprocDriver, MqResult, Socket, SocketKind};
use mockall::automock;

use super::builders::DeviceBuilder;
use super::test_timeout;

/// Socket creation, split out of [`Driver`] so it can be mocked
#[automock]
pub trait SocketFactory: Send + Sync {
    fn create(&self, kind: SocketKind) -> MqResult<Box<dyn Socket>>;
}

/// Driver delegating socket creation to a [`SocketFactory`]
pub struct FactoryDriver<F> {
    pub factory: F,
}

impl<F: SocketFactory> Driver for FactoryDriver<F> {
    fn name(&self) -> &str {
        "mock"
    }

    fn new_socket(&self, kind: SocketKind) -> MqResult<Box<dyn Socket>> {
        self.factory.create(kind)
    }
}

/// A driver that fails the test if any socket is created
pub fn driver_expecting_no_sockets() -> FactoryDriver<MockSocketFactory> {
    let mut factory = MockSocketFactory::new();
    factory.expect_create().times(0);
    FactoryDriver { factory }
}

/// A driver creating `count` in-memory sockets and no more
pub fn driver_expecting_sockets(count: usize) -> FactoryDriver<MockSocketFactory> {
    let inproc = InprocDriver::new();
    let mut factory = MockSocketFactory::new();
    factory
        .expect_create()
        .times(count)
        .returning(move |kind| inproc.new_socket(kind));
    FactoryDriver { factory }
}

/// Two started runtimes joined by one pair channel named `data`:
/// the first binds `address`, the second connects to it.
pub fn loopback(driver: &dyn Driver, address: &str) -> (DeviceRuntime, DeviceRuntime) {
    let server: DeviceConfig = DeviceBuilder::new("server")
        .channel("data", "pair", "bind", address)
        .build();
    let client: DeviceConfig = DeviceBuilder::new("client")
        .channel("data", "pair", "connect", address)
        .build();

    let mut server = DeviceRuntime::new(driver, &server).unwrap();
    let mut client = DeviceRuntime::new(driver, &client).unwrap();
    server.run().unwrap();
    client.run().unwrap();
    assert!(server.wait_started(test_timeout()));
    assert!(client.wait_started(test_timeout()));
    (server, client)
}
