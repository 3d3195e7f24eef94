mod startup;

pub use startup::{initialize_app, SeckillApp};
