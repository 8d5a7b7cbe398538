use crate::core::{DataError, Result};
use crate::data::ChangePayload;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

pub(super) const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    rows: Vec<ChangePayload>,
}

pub(super) async fn write_snapshot(path: &Path, rows: Vec<ChangePayload>) -> Result<()> {
    let file = SnapshotFile {
        version: SNAPSHOT_FORMAT_VERSION,
        rows,
    };
    let json = serde_json::to_vec_pretty(&file)?;

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, json).await?;
    fs::rename(&tmp_path, path).await?;

    Ok(())
}

pub(super) async fn read_snapshot(path: &Path) -> Result<Option<Vec<ChangePayload>>> {
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(path).await?;
    let file: SnapshotFile = serde_json::from_slice(&bytes)?;
    if file.version != SNAPSHOT_FORMAT_VERSION {
        return Err(DataError::Serialization(format!(
            "unsupported snapshot version {}",
            file.version
        )));
    }

    Ok(Some(file.rows))
}
