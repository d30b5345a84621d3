mod node_queue;

pub use node_queue::*;
