use std::{io, path::{Path, PathBuf}};

/// Resolve the block device node backing `p`.
///
/// A device node resolves to itself (through its `rdev`); any other path
/// resolves to the device of the filesystem it lives on.
pub fn canonical_block<P: AsRef<Path>>(p: P) -> io::Result<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        use plist::Value;
        use std::process::Command;

        let out = Command::new("diskutil")
            .arg("info")
            .arg("-plist")
            .arg(p.as_ref())
            .output()?;
        let dict = Value::from_reader_xml(&*out.stdout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
            .into_dictionary()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "plist parse fail"))?;
        let dev = dict
            .get("DeviceNode")
            .and_then(Value::as_string)
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no DeviceNode"))?;
        return Ok(PathBuf::from(dev));
    }

    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::{FileTypeExt, MetadataExt};

        let md = std::fs::metadata(&p)?;
        let dev = if md.file_type().is_block_device() { md.rdev() } else { md.dev() };
        let major = unsafe { libc::major(dev) };
        let minor = unsafe { libc::minor(dev) };
        let sys = std::fs::read_link(format!("/sys/dev/block/{major}:{minor}"))?;
        return node_from_sysfs_link(&sys);
    }

    #[allow(unreachable_code)]
    {
        let _ = p;
        Err(io::Error::new(io::ErrorKind::Other, "OS-unsupported"))
    }
}

/// `/sys/dev/block/M:m` links end in the kernel name of the device.
pub fn node_from_sysfs_link(link: &Path) -> io::Result<PathBuf> {
    let name = link
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "bad sysfs link"))?;
    Ok(PathBuf::from("/dev").join(name))
}
