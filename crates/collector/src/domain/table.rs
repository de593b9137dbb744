#![forbid(unsafe_code)]

use crate::domain::Process;
use rustc_hash::FxHashMap;

/// Processes of one cycle, indexed by pid.
#[derive(Debug, Default)]
pub struct ProcessTable {
    procs: Vec<Process>,
    index: FxHashMap<u32, usize>,
}

impl ProcessTable {
    /// Add a process. A second process with a pid already present is
    /// ignored and `false` is returned.
    pub fn insert(&mut self, process: Process) -> bool {
        if self.index.contains_key(&process.pid) {
            return false;
        }
        self.index.insert(process.pid, self.procs.len());
        self.procs.push(process);
        true
    }

    pub fn get(&self, pid: u32) -> Option<&Process> {
        self.index.get(&pid).map(|&idx| &self.procs[idx])
    }

    pub fn get_mut(&mut self, pid: u32) -> Option<&mut Process> {
        self.index.get(&pid).map(|&idx| &mut self.procs[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.procs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.procs.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn into_vec(self) -> Vec<Process> {
        self.procs
    }
}
