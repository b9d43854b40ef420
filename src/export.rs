// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Attack-group export.
//!
//! Flagged attacks are spooled into a maildir-style directory tree:
//! everything is assembled under `tmp/<group>/`, and only a completed
//! group is renamed into `new/`, so a consumer watching `new/` never
//! sees a partial export. `cur/` belongs to the consumer.
//!
//! Per-packet writes go to one file per attack instance under
//! `tmp/<group>/instances/`; ending the group concatenates the
//! instance files, wrapped in incident envelopes, into the group's
//! `all.xml`.

use crate::extract::rules::hex_bytes;
use std::{
    fs::File,
    io::{BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

const PACKAGE_HEADER: &str = "<package>\n";
const PACKAGE_FOOTER: &str = "</package>\n";
const INCIDENT_HEADER: &str = "  <incident>\n";
const INCIDENT_FOOTER: &str = "  </incident>\n";

/// Root of an export directory tree
pub struct AttackOutput {
    tmp_dir: PathBuf,
    new_dir: PathBuf,
    group_counter: AtomicU64,
}

impl AttackOutput {
    /// Opens (creating if needed) the `{tmp,new,cur}` tree under `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> crate::Result<Self> {
        let root = root.as_ref();

        let tmp_dir = root.join("tmp");
        let new_dir = root.join("new");
        let cur_dir = root.join("cur");

        std::fs::create_dir_all(&tmp_dir)?;
        std::fs::create_dir_all(&new_dir)?;
        std::fs::create_dir_all(&cur_dir)?;

        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();

        Ok(Self {
            tmp_dir,
            new_dir,
            group_counter: AtomicU64::new(u64::from(seed)),
        })
    }

    /// Starts a fresh attack group under `tmp/`.
    pub fn start_group(&self) -> crate::Result<AttackGroup<'_>> {
        // Retry on collision; the counter makes names unique within
        // this process, the seed across restarts
        loop {
            let token = self.group_counter.fetch_add(1, Ordering::Relaxed);
            let name = format!("group-{token:016x}");
            let dir = self.tmp_dir.join(&name);

            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    std::fs::create_dir(dir.join("instances"))?;
                    log::debug!("started attack group {name}");

                    return Ok(AttackGroup {
                        output: self,
                        name,
                        dir,
                        instances: Vec::new(),
                        instance_counter: 0,
                        finished: false,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// One attack group being assembled under `tmp/`
pub struct AttackGroup<'a> {
    output: &'a AttackOutput,
    name: String,
    dir: PathBuf,
    instances: Vec<PathBuf>,
    instance_counter: u64,
    finished: bool,
}

impl AttackGroup<'_> {
    /// Opens the next attack-instance spool file.
    pub fn start_instance(&mut self) -> crate::Result<AttackInstance> {
        let path = self
            .dir
            .join("instances")
            .join(format!("{:06}", self.instance_counter));
        self.instance_counter += 1;

        let file = File::create(&path)?;

        Ok(AttackInstance {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Seals an instance and queues it for concatenation.
    pub fn end_instance(&mut self, instance: AttackInstance) -> crate::Result<()> {
        let mut writer = instance.writer;
        writer.flush()?;
        drop(writer);

        self.instances.push(instance.path);
        Ok(())
    }

    /// Concatenates the instances into `all.xml` and publishes the
    /// group atomically into `new/`.
    ///
    /// Returns the published path.
    pub fn finish(mut self) -> crate::Result<PathBuf> {
        let all_path = self.dir.join("all.xml");

        {
            let mut all = BufWriter::new(File::create(&all_path)?);
            all.write_all(PACKAGE_HEADER.as_bytes())?;

            for instance_path in &self.instances {
                all.write_all(INCIDENT_HEADER.as_bytes())?;

                let mut instance = File::open(instance_path)?;
                let mut contents = String::new();
                instance.read_to_string(&mut contents)?;
                all.write_all(contents.as_bytes())?;

                all.write_all(INCIDENT_FOOTER.as_bytes())?;
            }

            all.write_all(PACKAGE_FOOTER.as_bytes())?;
            all.flush()?;
            all.get_ref().sync_all()?;
        }

        let published = self.output.new_dir.join(format!("{}.xml", self.name));
        std::fs::rename(&all_path, &published)?;

        self.finished = true;
        std::fs::remove_dir_all(&self.dir)?;

        log::info!("published attack group to {published:?}");

        Ok(published)
    }

    /// Drops the group; nothing surfaces in `new/`.
    pub fn abort(mut self) -> crate::Result<()> {
        self.finished = true;
        std::fs::remove_dir_all(&self.dir)?;
        Ok(())
    }
}

impl Drop for AttackGroup<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Abandoned group; best effort cleanup of the tmp subtree
            if let Err(e) = std::fs::remove_dir_all(&self.dir) {
                log::warn!("could not clean up attack group {}: {e}", self.name);
            }
        }
    }
}

/// Spool file for the packets of one attack instance
pub struct AttackInstance {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl AttackInstance {
    /// Appends one packet, wrapped in its envelope fragment.
    pub fn append_packet(
        &mut self,
        timestamp: Duration,
        payload: &[u8],
        prob_attack: f32,
    ) -> crate::Result<()> {
        writeln!(
            self.writer,
            "    <packet time=\"{}.{:06}\" probability=\"{prob_attack}\">{}</packet>",
            timestamp.as_secs(),
            timestamp.subsec_micros(),
            hex_bytes(payload),
        )?;
        Ok(())
    }

    /// Spool-file location of this instance.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
