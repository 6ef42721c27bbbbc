//! Prints the ResourceGroup CRD manifest as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/resourcegroup.yaml`

use crds::ResourceGroup;
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crd = serde_yaml::to_string(&ResourceGroup::crd())?;
    print!("{crd}");
    Ok(())
}
