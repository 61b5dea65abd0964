mod kubernetes;

pub use kubernetes::{KubeCluster, KubeClusterSettings};
