use log::info;

pub mod name;
pub mod packets;
pub mod validation;

pub use name::{Component, Name};
pub use packets::{Data, FaceId, Interest, Nack, NackReason, Packet, PushPacket};
pub use validation::{ValidationConfig, ValidationError};

pub fn init() {
    info!("MIR core initialized");
}
