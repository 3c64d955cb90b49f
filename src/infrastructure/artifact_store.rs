//! 磁盘产物存储
//!
//! ## 职责
//! - 列出目录中的图片文件（自然顺序）
//! - 翻译脚本缓存：每个 (页面, 轮次) 只请求一次，写入后不再改动
//! - 输出目录布局：`out1` 为初始轮，`out{k+1}` 为第 k 轮
//!
//! 所有写入都先写临时文件、落盘后再改名，中断时不会留下半个文件。

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use regex::Regex;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::FileError;
use crate::models::{natural_cmp, Catalog, ItemId};

/// 可识别的图片扩展名
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// 是否是可识别的图片文件名
pub fn is_image_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// 列出目录中的图片文件名，按自然顺序排序；目录不存在时返回空列表
pub fn list_images(dir: &Path) -> Result<Vec<String>, FileError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| FileError::list(dir, e))? {
        let entry = entry.map_err(|e| FileError::list(dir, e))?;
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_image_file(&name) {
            names.push(name);
        }
    }

    names.sort_by(|a, b| natural_cmp(a, b).then_with(|| a.cmp(b)));
    Ok(names)
}

/// MIME 类型对应的文件扩展名，未知类型按 png 处理
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    }
}

/// 原子写入：先写同目录下的临时文件并落盘，再改名覆盖目标
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FileError> {
    let mut tmp = temp_file_beside(path)?;
    tmp.write_all(bytes).map_err(|e| FileError::write(path, e))?;
    persist(tmp, path)
}

/// 原子复制，内容逐字节保持不变
pub fn copy_atomic(from: &Path, to: &Path) -> Result<(), FileError> {
    let copy_failed = |source: io::Error| FileError::CopyFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    let mut source = fs::File::open(from).map_err(copy_failed)?;
    let mut tmp = temp_file_beside(to)?;
    io::copy(&mut source, &mut tmp).map_err(copy_failed)?;
    persist(tmp, to)
}

fn temp_file_beside(path: &Path) -> Result<NamedTempFile, FileError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| FileError::write(parent, e))?;
    NamedTempFile::new_in(parent).map_err(|e| FileError::write(parent, e))
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<(), FileError> {
    tmp.as_file()
        .sync_all()
        .map_err(|e| FileError::write(path, e))?;
    tmp.persist(path).map_err(|e| FileError::write(path, e.error))?;
    Ok(())
}

fn same_bytes(a: &Path, b: &Path) -> Result<bool, FileError> {
    let left = fs::read(a).map_err(|e| FileError::read(a, e))?;
    let right = fs::read(b).map_err(|e| FileError::read(b, e))?;
    Ok(left == right)
}

// ========== 翻译脚本缓存 ==========

/// 翻译脚本缓存
///
/// 路径为 `{dir}/{id}_iter{k}.txt`。内容非空的脚本视为已完成，永不覆盖。
#[derive(Debug, Clone)]
pub struct ScriptCache {
    dir: PathBuf,
}

impl ScriptCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, item: &ItemId, iteration: u32) -> PathBuf {
        self.dir.join(format!("{}_iter{}.txt", item, iteration))
    }

    /// 读取已缓存的脚本；文件缺失或内容为空时返回 None
    pub fn get(&self, item: &ItemId, iteration: u32) -> Result<Option<String>, FileError> {
        let path = self.path(item, iteration);
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path).map_err(|e| FileError::read(&path, e))?;
        if text.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }

    /// 写入脚本；已存在非空脚本时保留旧内容并返回旧内容
    pub fn put(&self, item: &ItemId, iteration: u32, text: &str) -> Result<String, FileError> {
        if let Some(existing) = self.get(item, iteration)? {
            debug!("[页面 {}] 第 {} 轮脚本已存在，保持不变", item, iteration);
            return Ok(existing);
        }
        let path = self.path(item, iteration);
        write_atomic(&path, text.as_bytes())?;
        Ok(text.to_string())
    }
}

// ========== 输出目录布局 ==========

/// 某个输出目录中 标识 → 产物路径 的索引
pub type FolderIndex = BTreeMap<ItemId, PathBuf>;

/// 按轮次编号的输出目录
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    prefix: String,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    /// 第 k 轮的目录名，如 `out1`
    pub fn folder_name(&self, iteration: u32) -> String {
        format!("{}{}", self.prefix, iteration + 1)
    }

    pub fn folder(&self, iteration: u32) -> PathBuf {
        self.root.join(self.folder_name(iteration))
    }

    /// 为目录中的图片建立索引；同一标识有多个文件时自然顺序靠后的生效
    pub fn index_dir(dir: &Path) -> Result<FolderIndex, FileError> {
        let mut index = FolderIndex::new();
        for name in list_images(dir)? {
            let id = ItemId::from_filename(&name);
            index.insert(id, dir.join(name));
        }
        Ok(index)
    }

    pub fn index(&self, iteration: u32) -> Result<FolderIndex, FileError> {
        Self::index_dir(&self.folder(iteration))
    }

    /// 第 k 轮目录中已有产物的标识
    pub fn existing_ids(&self, iteration: u32) -> Result<BTreeSet<ItemId>, FileError> {
        Ok(self.index(iteration)?.into_keys().collect())
    }

    pub fn output_path(&self, iteration: u32, item: &ItemId) -> Result<Option<PathBuf>, FileError> {
        Ok(self.index(iteration)?.remove(item))
    }

    /// 目录存在且目录中每个页面都有产物
    pub fn is_complete(&self, iteration: u32, catalog: &Catalog) -> Result<bool, FileError> {
        if !self.folder(iteration).is_dir() {
            return Ok(false);
        }
        let existing = self.existing_ids(iteration)?;
        Ok(catalog.ids().all(|id| existing.contains(id)))
    }

    /// 最近一个连续完整的精修轮次
    ///
    /// 从第 1 轮开始向上检查，遇到第一个缺失或不完整的目录就停止；都不完整时返回 0。
    pub fn last_complete_iteration(
        &self,
        catalog: &Catalog,
        max_iterations: u32,
    ) -> Result<u32, FileError> {
        let mut baseline = 0;
        for k in 1..=max_iterations {
            if !self.is_complete(k, catalog)? {
                debug!("{} 不存在或不完整，停止扫描", self.folder_name(k));
                break;
            }
            baseline = k;
        }
        Ok(baseline)
    }

    /// 写入第 k 轮的产物，扩展名由 MIME 决定
    pub fn write_output(
        &self,
        iteration: u32,
        item: &ItemId,
        mime: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, FileError> {
        let path = self
            .folder(iteration)
            .join(format!("{}.{}", item, extension_for_mime(mime)));
        write_atomic(&path, bytes)?;
        Ok(path)
    }

    /// 把已通过页面的产物从第 k-1 轮原样复制到第 k 轮
    ///
    /// 第 k 轮已有与上一轮逐字节相同的产物时直接返回该路径；已有产物不同
    /// （例如中断前重新生成过、尚未评估）时用上一轮的产物替换，并删除同一页面的其他文件。
    /// 上一轮缺少产物时返回 None。
    pub fn copy_forward(&self, iteration: u32, item: &ItemId) -> Result<Option<PathBuf>, FileError> {
        let Some(previous) = iteration
            .checked_sub(1)
            .map(|prev| self.output_path(prev, item))
            .transpose()?
            .flatten()
        else {
            debug!("[页面 {}] 上一轮没有产物，无法沿用", item);
            return Ok(None);
        };

        let file_name = previous
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| format!("{}.png", item).into());
        let target = self.folder(iteration).join(file_name);

        let existing = self.files_of(iteration, item)?;
        if existing.len() == 1 && existing[0] == target && same_bytes(&previous, &target)? {
            return Ok(Some(target));
        }
        if !existing.is_empty() {
            warn!(
                "[页面 {}] ⚠️ {} 中已有的产物与上一轮不一致，改用上一轮的产物",
                item,
                self.folder_name(iteration)
            );
        }

        copy_atomic(&previous, &target)?;
        for stale in existing.iter().filter(|path| **path != target) {
            fs::remove_file(stale).map_err(|e| FileError::write(stale, e))?;
        }
        Ok(Some(target))
    }

    /// 第 k 轮目录中属于该页面的所有图片文件
    fn files_of(&self, iteration: u32, item: &ItemId) -> Result<Vec<PathBuf>, FileError> {
        let dir = self.folder(iteration);
        Ok(list_images(&dir)?
            .into_iter()
            .filter(|name| ItemId::from_filename(name) == *item)
            .map(|name| dir.join(name))
            .collect())
    }

    /// 发现所有 `{prefix}{n}` 形式的输出目录，按 n 升序
    pub fn discover_iteration_folders(&self) -> Result<Vec<(u32, PathBuf)>, FileError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = format!(r"^{}(\d+)$", regex::escape(&self.prefix));
        let Ok(re) = Regex::new(&pattern) else {
            return Ok(Vec::new());
        };

        let mut folders = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| FileError::list(&self.root, e))? {
            let entry = entry.map_err(|e| FileError::list(&self.root, e))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(number) = re
                .captures(&name)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
            else {
                continue;
            };
            folders.push((number, entry.path()));
        }
        folders.sort_by_key(|(number, _)| *number);
        Ok(folders)
    }
}
