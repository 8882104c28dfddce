//! Confirmation tokens guarding destructive instructions.
//!
//! The token is derived from the identity of the device that is actually
//! open, so a token copied from one drive never unlocks another.

use crate::blkdev::{BlockDevice, DeviceIdentity};
use crate::error::AppError;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |h, &b| (h ^ b as u64).wrapping_mul(FNV_PRIME))
}

pub fn calculate(identity: &DeviceIdentity) -> String {
    let source = match &identity.serial {
        Some(serial) => format!(
            "{}:{}:{}",
            serial.trim(),
            identity.logical_block_count,
            identity.logical_block_size
        ),
        None => format!(
            "{}:{}:{}",
            identity.path.display(),
            identity.logical_block_count,
            identity.logical_block_size
        ),
    };
    let h = fnv1a(source.as_bytes());
    format!("{:08x}", (h ^ (h >> 32)) as u32)
}

/// Compare `supplied` with a token freshly derived from `dev`.
pub fn check(dev: &dyn BlockDevice, supplied: &str) -> Result<(), AppError> {
    let expected = calculate(&dev.identity());
    if supplied != expected {
        return Err(AppError::CaptchaMismatch {
            path: dev.path().to_path_buf(),
            given: supplied.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn identity(serial: Option<&str>) -> DeviceIdentity {
        DeviceIdentity {
            path: PathBuf::from("/dev/sdc"),
            serial: serial.map(str::to_string),
            logical_block_count: 1_953_525_168,
            logical_block_size: 512,
        }
    }

    #[test]
    fn deterministic_and_device_specific() {
        let a = calculate(&identity(Some("S3Z9NB0K")));
        assert_eq!(a, calculate(&identity(Some("S3Z9NB0K"))));
        assert_eq!(a.len(), 8);
        assert_ne!(a, calculate(&identity(Some("S3Z9NB0L"))));
        assert_ne!(a, calculate(&identity(None)));
    }

    #[test]
    fn serial_wins_over_node_name() {
        let mut moved = identity(Some("S3Z9NB0K"));
        moved.path = PathBuf::from("/dev/sdq");
        assert_eq!(calculate(&moved), calculate(&identity(Some("S3Z9NB0K"))));
    }
}
