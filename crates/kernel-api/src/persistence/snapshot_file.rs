//! `.snap.zst`: one zstd stream holding a JSON header line followed by the CBOR body.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use kernel_core::snapshot_v1::SnapshotHeader;
use kernel_core::SnapshotV1;
use zstd::stream::{Decoder, Encoder};

use crate::Result;

const ZSTD_LEVEL: i32 = 3;

/// Writes beside the target and renames into place.
pub fn write_snapshot(path: impl AsRef<Path>, snapshot: &SnapshotV1) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("zst.tmp");
    {
        let file = BufWriter::new(File::create(&tmp)?);
        let mut encoder = Encoder::new(file, ZSTD_LEVEL)?;
        serde_json::to_writer(&mut encoder, &snapshot.header)?;
        encoder.write_all(b"\n")?;
        serde_cbor::to_writer(&mut encoder, snapshot)?;
        let mut file = encoder.finish()?;
        file.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_snapshot(path: impl AsRef<Path>) -> Result<SnapshotV1> {
    let mut reader = BufReader::new(Decoder::new(File::open(path.as_ref())?)?);
    let mut header = String::new();
    reader.read_line(&mut header)?;
    Ok(serde_cbor::from_reader(reader)?)
}

/// Decodes only the informational first line.
pub fn read_snapshot_header(path: impl AsRef<Path>) -> Result<SnapshotHeader> {
    let mut reader = BufReader::new(Decoder::new(File::open(path.as_ref())?)?);
    let mut header = String::new();
    reader.read_line(&mut header)?;
    Ok(serde_json::from_str(header.trim_end())?)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kernel_core::{CatalogBundle, JoinSpec, StepInput, VoxelWorld, WorldConfig};

    use super::*;
    use crate::test_support::temp_dir;

    #[test]
    fn snapshot_file_restores_world_digest() {
        let dir = temp_dir("snapshot-file");
        let catalog = Arc::new(CatalogBundle::builtin());
        let mut config = WorldConfig::default();
        config.seed = 99;
        let mut world = VoxelWorld::new(config, Arc::clone(&catalog));
        world.step_once(StepInput {
            joins: vec![JoinSpec::new("alpha"), JoinSpec::new("beta")],
            ..StepInput::default()
        });
        for _ in 0..5 {
            world.step_once(StepInput::default());
        }
        let path = dir.join("snapshots").join("6.snap.zst");
        write_snapshot(&path, &world.export_snapshot()).expect("write");

        let header = read_snapshot_header(&path).expect("header");
        assert_eq!(header.tick, 6);
        assert_eq!(header.world_id, "OVERWORLD");

        let restored = VoxelWorld::from_snapshot(read_snapshot(&path).expect("read"), catalog)
            .expect("import");
        assert_eq!(restored.state_digest(), world.state_digest());
        assert!(!path.with_extension("zst.tmp").exists());
    }

    #[test]
    fn garbage_file_is_a_decode_error() {
        let dir = temp_dir("snapshot-garbage");
        let path = dir.join("1.snap.zst");
        std::fs::write(&path, b"not zstd at all").expect("write");
        assert!(read_snapshot(&path).is_err());
    }
}
