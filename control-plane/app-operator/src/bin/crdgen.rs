use app_operator::crd::app::App;
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(&App::crd())?;
    print!("{yaml}");
    Ok(())
}
