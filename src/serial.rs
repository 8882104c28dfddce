use std::{io, path::Path};

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("device serial not found")]
    NotFound,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial lookup unsupported on this platform")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Serial number of the disk behind `dev`, used to tie captchas and
/// bad-block files to a physical drive rather than a device node name.
pub fn disk_serial<P: AsRef<Path>>(dev: P) -> Result<String> {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "linux")] {
            linux::serial(dev)
        } else if #[cfg(target_os = "macos")] {
            macos::serial(dev)
        } else {
            let _ = dev;
            Err(SerialError::Unsupported)
        }
    }
}

fn non_empty(raw: &str) -> Result<String> {
    let s = raw.trim();
    if s.is_empty() {
        Err(SerialError::NotFound)
    } else {
        Ok(s.to_owned())
    }
}

/* ---------- LINUX ---------- */
#[cfg(target_os = "linux")]
mod linux {
    use super::*;
    use udev::{Device, Enumerator};

    pub fn serial<P: AsRef<Path>>(dev: P) -> Result<String> {
        let dev = dev.as_ref().canonicalize()?;
        let mut en = Enumerator::new()?;
        en.match_subsystem("block")?;
        for d in en.scan_devices()? {
            if d.devnode() == Some(dev.as_path()) {
                return prop(&d);
            }
        }
        Err(SerialError::NotFound)
    }

    fn prop(d: &Device) -> Result<String> {
        let value = d
            .property_value("ID_SERIAL_SHORT")
            .or_else(|| d.property_value("ID_SERIAL"))
            .ok_or(SerialError::NotFound)?;
        non_empty(&value.to_string_lossy())
    }
}

/* ---------- macOS ---------- */
#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use plist::Value;
    use std::process::Command;

    pub fn serial<P: AsRef<Path>>(dev: P) -> Result<String> {
        let out = Command::new("diskutil")
            .arg("info")
            .arg("-plist")
            .arg(dev.as_ref())
            .output()?;
        let plist = Value::from_reader_xml(&*out.stdout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let dict = plist.as_dictionary().ok_or(SerialError::NotFound)?;
        // diskutil has no serial key; the media UUID is the closest stable id.
        let value = dict
            .get("DiskUUID")
            .or_else(|| dict.get("MediaUUID"))
            .and_then(Value::as_string)
            .ok_or(SerialError::NotFound)?;
        non_empty(value)
    }
}
