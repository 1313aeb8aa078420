//! Print the Source and HotNews CRDs as a multi-document YAML stream

use kube::CustomResourceExt;
use news_operator::{HotNews, Source};

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Source::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&HotNews::crd())?);
    Ok(())
}
