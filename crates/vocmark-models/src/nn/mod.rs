//! Building blocks shared by the codec and the discriminator.

mod conv;
mod init;

pub use conv::WeightNormConv1d;
pub use init::Initializer;
