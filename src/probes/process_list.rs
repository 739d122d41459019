use anyhow::Result;
use async_trait::async_trait;
use sysinfo::{ProcessesToUpdate, System};

use super::{ProcessListProbe, RunningProcess};

/// Cross-platform process scanner backed by [sysinfo]. Reuses one [System] so
/// repeated refreshes stay cheap.
pub struct SysinfoProcessProbe {
    system: System,
}

impl SysinfoProcessProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessListProbe for SysinfoProcessProbe {
    async fn poll(&mut self) -> Result<Vec<RunningProcess>> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        Ok(self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| RunningProcess {
                exe_name: process.name().to_string_lossy().to_lowercase(),
                pid: pid.as_u32(),
            })
            .collect())
    }
}

#[cfg(test)]
mod process_list_tests {
    use super::*;

    #[tokio::test]
    async fn scan_reports_lowercased_names() -> Result<()> {
        let mut probe = SysinfoProcessProbe::new();
        let processes = probe.poll().await?;

        // The test runner itself must show up.
        assert!(!processes.is_empty());
        for process in &processes {
            assert_eq!(process.exe_name, process.exe_name.to_lowercase());
        }
        Ok(())
    }
}
