use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::core::hardware::VolumeSource;
use crate::core::share::ShareConnector;

#[cfg(target_os = "linux")]
mod linux;
mod mounted_share;
mod simulated;
mod simulated_share;

#[cfg(target_os = "linux")]
pub use linux::{MountBaseSource, PartitionTableSource, is_mount_point, parse_mounts};
pub use mounted_share::MountedShareConnector;
pub use simulated::{SimulatedAdapter, Simulator};
pub use simulated_share::{ShareController, SimulatedConnector, SimulatedShare, WriteCall};

pub fn get_volume_sources(config: &AppConfig, simulation: bool) -> Vec<Box<dyn VolumeSource>> {
    if simulation {
        let (adapter, controller) = SimulatedAdapter::new();

        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lines().map_while(Result::ok) {
                let parts: Vec<&str> = line.split_whitespace().collect();
                match (parts.first().copied(), parts.get(1)) {
                    (Some("add"), Some(path)) => controller.add_volume(path),
                    (Some("rm"), Some(path)) => controller.remove_volume(path),
                    _ => println!("(Simulator) Use: 'add <mount path>' or 'rm <mount path>'"),
                }
            }
        });

        return vec![Box::new(adapter)];
    }

    #[cfg(target_os = "linux")]
    {
        vec![
            Box::new(MountBaseSource::new(&config.paths.sd_mount_base)),
            Box::new(PartitionTableSource::default()),
        ]
    }

    #[cfg(not(target_os = "linux"))]
    {
        let _ = config;
        Vec::new()
    }
}

pub fn get_connector(config: &AppConfig, simulation: bool) -> Arc<dyn ShareConnector> {
    if simulation {
        let (connector, _controller) = SimulatedShare::new();
        info!("Using in-memory share");
        return Arc::new(connector);
    }

    let mount_point = config.smb.resolved_mount_point();
    info!(mount_point = %mount_point.display(), "Using mounted share");
    Arc::new(MountedShareConnector::new(mount_point))
}
