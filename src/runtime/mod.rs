mod buffer;
mod reactor;
mod timer;
mod worker;

pub use {
    buffer::ByteBuffer,
    reactor::{Edge, Reactor},
    timer::{TimerId, Timers},
    worker::{Ring, Worker, WorkerCtx},
};
