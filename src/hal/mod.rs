pub mod transport;

pub use transport::{create_connector, Connector, DatagramTransport};
