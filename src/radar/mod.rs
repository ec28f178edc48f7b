pub mod frame;
pub mod processor;
pub mod tlv;
pub mod transport;

pub use processor::{run_processor, ProcessorConfig, ProcessorMessage};
pub use transport::{list_ports, open_data_port, RadarControl};
