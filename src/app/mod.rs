pub mod application;
pub mod backoff;
pub mod cli;
pub mod cluster;
pub mod context;
pub mod federation;
pub mod identity;
pub mod kubeconfig;
#[cfg(test)]
pub mod loopback;
pub mod mask;
pub mod token;
