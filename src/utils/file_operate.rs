use std::{
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::Path,
    str::FromStr,
};

use anyhow::{Context, Result, anyhow};

pub fn check_read_simple<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().is_file()
}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let path_ref = path.as_ref();
    let mut file = File::open(path_ref)
        .with_context(|| format!("Failed to open file for reading: {}", path_ref.display()))?;

    let mut content = String::new();
    file.read_to_string(&mut content)
        .with_context(|| format!("Failed to read from file: {}", path_ref.display()))?;
    Ok(content)
}

/// 读取只含一个数值的节点
pub fn read_value<T, P>(path: P) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    P: AsRef<Path>,
{
    let path_ref = path.as_ref();
    let content = read_file(path_ref)?;
    content
        .trim()
        .parse::<T>()
        .with_context(|| format!("Failed to parse value {:?} from {}", content.trim(), path_ref.display()))
}

/// 写入节点内容（不创建新文件）
pub fn write_file<P: AsRef<Path>>(path: P, content: &str) -> Result<()> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Err(anyhow!("File does not exist: {}", path_ref.display()));
    }

    let mut file = OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path_ref)
        .with_context(|| format!("Failed to open file for writing: {}", path_ref.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write to file: {}", path_ref.display()))?;
    Ok(())
}
