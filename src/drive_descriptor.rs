use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusType {
    Usb,
    Nvme,
    Sata,
    Sas,
    Sd,
    Thunderbolt,
    #[default]
    Unknown,
}

impl BusType {
    /// Map the last component of a sysfs `device/subsystem` link.
    pub fn from_subsystem(name: &str) -> Self {
        match name {
            "nvme" => BusType::Nvme,
            "usb" => BusType::Usb,
            "mmc" => BusType::Sd,
            "sas" => BusType::Sas,
            "scsi" => BusType::Sata,
            _ => BusType::Unknown,
        }
    }

    /// Map a `diskutil` protocol string.
    pub fn from_protocol(protocol: &str) -> Self {
        match protocol.to_ascii_lowercase().as_str() {
            "usb" => BusType::Usb,
            "nvme" | "pci-express" => BusType::Nvme,
            "sata" => BusType::Sata,
            "sas" => BusType::Sas,
            "sd" | "mmc" => BusType::Sd,
            "thunderbolt" => BusType::Thunderbolt,
            _ => BusType::Unknown,
        }
    }
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusType::Usb => "USB",
            BusType::Nvme => "NVMe",
            BusType::Sata => "SATA",
            BusType::Sas => "SAS",
            BusType::Sd => "SD/MMC",
            BusType::Thunderbolt => "Thunderbolt",
            BusType::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MediaKind {
    Ssd,
    Hdd,
    #[default]
    Unknown,
}

impl MediaKind {
    pub fn from_rotational(rotational: Option<bool>) -> Self {
        match rotational {
            Some(true) => MediaKind::Hdd,
            Some(false) => MediaKind::Ssd,
            None => MediaKind::Unknown,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MediaKind::Ssd => "SSD",
            MediaKind::Hdd => "HDD",
            MediaKind::Unknown => "unknown",
        })
    }
}

/// Best-effort platform metadata shown by `info`.
#[derive(Debug, Default)]
pub struct DriveDescriptor {
    pub bus: BusType,
    pub media: MediaKind,
    pub rotational: Option<bool>,
    pub sector_size: Option<u32>,
}

pub fn drive_descriptor_from_path(p: &std::path::Path) -> std::io::Result<DriveDescriptor> {
    #[cfg(target_os = "linux")]
    {
        return linux_descriptor(p);
    }
    #[cfg(target_os = "macos")]
    {
        return mac_descriptor(p);
    }
    #[allow(unreachable_code)]
    {
        let _ = p;
        Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "OS-unsupported",
        ))
    }
}

#[cfg(target_os = "linux")]
fn linux_descriptor(p: &std::path::Path) -> std::io::Result<DriveDescriptor> {
    use std::{fs, io, path::Path};

    let path = crate::path_utils::canonical_block(p)?;
    let dev = fs::canonicalize(&path)?;
    let name = dev
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "invalid device"))?;

    // Partitions have no queue/ directory of their own.
    let sys_path = Path::new("/sys/class/block").join(name);
    let sys_path = if sys_path.join("partition").exists() {
        sys_path.join("..")
    } else {
        sys_path
    };

    let rotational = fs::read_to_string(sys_path.join("queue/rotational"))
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .map(|v| v != 0);

    let sector_size = fs::read_to_string(sys_path.join("queue/logical_block_size"))
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok());

    let bus = fs::read_link(sys_path.join("device/subsystem"))
        .ok()
        .and_then(|l| l.file_name().and_then(|s| s.to_str()).map(BusType::from_subsystem))
        .unwrap_or_default();

    Ok(DriveDescriptor {
        bus,
        media: MediaKind::from_rotational(rotational),
        rotational,
        sector_size,
    })
}

#[cfg(target_os = "macos")]
fn mac_descriptor(p: &std::path::Path) -> std::io::Result<DriveDescriptor> {
    use plist::Value;
    use std::{io, process::Command};

    let path = crate::path_utils::canonical_block(p)?;

    let out = Command::new("diskutil")
        .arg("info")
        .arg("-plist")
        .arg(&path)
        .output()?;

    let plist = Value::from_reader_xml(&*out.stdout)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let dict = plist
        .as_dictionary()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "unexpected output"))?;

    let bus = dict
        .get("Protocol")
        .or_else(|| dict.get("BusProtocol"))
        .and_then(|v| v.as_string())
        .map(BusType::from_protocol)
        .unwrap_or_default();

    let rotational = dict
        .get("SolidState")
        .and_then(|v| v.as_boolean())
        .map(|solid| !solid);

    let sector_size = dict
        .get("DeviceBlockSize")
        .and_then(|v| v.as_signed_integer())
        .map(|n| n as u32);

    Ok(DriveDescriptor {
        bus,
        media: MediaKind::from_rotational(rotational),
        rotational,
        sector_size,
    })
}
