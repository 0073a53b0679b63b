//! Feed-forward classification networks built on a small scalar autograd
//! engine, with checkpoints that carry enough architecture metadata to
//! rebuild the network they were taken from.

pub mod backprop_fns;
pub mod checkpoint;
pub mod dataloader;
pub mod datasets;
pub mod loss;
pub mod model;
pub mod nn;
pub mod optim;
pub mod state_dict;
pub mod train;
pub mod values;
