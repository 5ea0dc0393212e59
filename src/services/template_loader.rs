//! 沙箱项目模板加载

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::models::GeneratedFile;

/// 读取模板目录下的所有文件，路径统一为 `/` 分隔的相对路径
///
/// 目录不存在时返回空列表；单个文件读取失败只记录警告
pub async fn load_template_files(template_dir: &Path) -> Vec<GeneratedFile> {
    if !template_dir.exists() {
        warn!("⚠️ 模板目录不存在: {}", template_dir.display());
        return Vec::new();
    }

    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = vec![template_dir.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("无法读取目录 {}: {}", dir.display(), e);
                continue;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }

            let Some(rel_path) = relative_path(template_dir, &path) else {
                continue;
            };

            match fs::read_to_string(&path).await {
                Ok(content) => files.push(GeneratedFile::new(rel_path, content)),
                Err(e) => warn!("读取模板文件失败 {}: {}", rel_path, e),
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    info!("✓ 已加载 {} 个模板文件", files.len());
    files
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
