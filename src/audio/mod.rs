pub mod fifo;
pub mod pcm;
pub mod ring;
pub mod tone;

pub use fifo::{BlockFifo, FifoSlot, Wait};
pub use pcm::Channel;
pub use ring::SampleRing;
