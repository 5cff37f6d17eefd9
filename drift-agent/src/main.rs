use drift_agent::{capture, respond, LocalHost};
use drift_wrappers::Registry;

fn main() -> anyhow::Result<()> {
    capture::init()?;

    let encoded = std::env::args().nth(1);
    let registry = Registry::builtin();
    let host = LocalHost::default();
    let mut rng = rand::thread_rng();

    let mut response = respond(encoded.as_deref(), &registry, &host, &mut rng);
    response.stderr = capture::drain();

    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}
