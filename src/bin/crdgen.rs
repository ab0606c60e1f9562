use autovpa::crd::VPAConfig;
use kube::CustomResourceExt;

fn main() {
    print!("{}", serde_yaml::to_string(&VPAConfig::crd()).unwrap());
}
