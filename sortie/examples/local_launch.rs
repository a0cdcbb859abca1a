//! Launch a few local steps, poll them to completion and stop a straggler.
//!
//! Run with `cargo run --example local_launch`; set `RUST_LOG=sortie=debug`
//! for the launcher's own logs.

use std::time::Duration;

use sortie::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _telemetry = telemetry::init("sortie=info")?;

    let workdir = std::env::temp_dir().join("sortie-local-launch");
    std::fs::create_dir_all(&workdir)?;

    let launcher = LocalLauncher::builder(Local::new())
        .with_config(
            LauncherConfig::default()
                .with_supervisor(SupervisorConfig::default().with_poll_interval(50)),
        )
        .build();

    let quick = launcher.create_step(
        "quick",
        &workdir,
        LaunchSettings::Local(RunSettings::new("sh").with_args(["-c", "echo done"])),
    )?;
    let failing = launcher.create_step(
        "failing",
        &workdir,
        LaunchSettings::Local(RunSettings::new("sh").with_args(["-c", "exit 2"])),
    )?;
    let slow = launcher.create_step(
        "slow",
        &workdir,
        LaunchSettings::Local(RunSettings::new("sleep").with_args(["60"])),
    )?;

    for step in [&quick, &failing, &slow] {
        let id = launcher.run(step).await?;
        println!("launched {} as {id}", step.name());
    }

    let names = ["quick", "failing"];
    loop {
        let updates = launcher.get_step_update(&names).await;
        for (name, info) in &updates {
            println!("{name}: {} (returncode {:?})", info.status, info.returncode);
        }
        if updates.iter().all(|(_, info)| info.status.is_terminal()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    let info = launcher.stop("slow").await?;
    println!("slow: {}", info.status);

    launcher.shutdown().await?;
    Ok(())
}
