pub mod master;
pub mod replica;

pub use master::MasterState;
pub use replica::ReplicaState;
