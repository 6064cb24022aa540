use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mediatag::{MetadataRecord, ParseError};

/// 스캔된 오디오 파일 하나와 태그 추출 결과.
#[derive(Debug)]
pub struct AudioFile {
    pub path: PathBuf,
    pub result: std::result::Result<MetadataRecord, ParseError>,
}

impl AudioFile {
    pub fn filename(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
    }

    pub fn record(&self) -> Option<&MetadataRecord> {
        self.result.as_ref().ok()
    }

    pub fn has_tags(&self) -> bool {
        self.record().is_some_and(|r| r.is_recognized())
    }

    pub fn status(&self) -> String {
        match &self.result {
            Ok(record) if record.is_recognized() => "ok".to_string(),
            Ok(_) => "no tag".to_string(),
            Err(e) => e.to_string(),
        }
    }
}

/// 디렉토리를 재귀 탐색하여 설정된 확장자의 파일을 모두 스캔한다.
/// 결과는 경로 순으로 정렬된다.
pub fn scan_directory(dir: &Path, extensions: &[String]) -> Result<Vec<AudioFile>> {
    let mut files = Vec::new();
    collect_audio_files(dir, extensions, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn collect_audio_files(
    dir: &Path,
    extensions: &[String],
    files: &mut Vec<AudioFile>,
) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("{}은(는) 디렉토리가 아닙니다", dir.display());
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            collect_audio_files(&path, extensions, files)?;
        } else if has_extension(&path, extensions) {
            files.push(load_audio_file(&path)?);
        }
    }

    Ok(())
}

/// 확장자 비교는 대소문자를 무시한다.
fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// 파일 전체를 읽어 태그를 추출한다. 읽기 실패만 에러로 취급한다.
pub fn load_audio_file(path: &Path) -> Result<AudioFile> {
    if !path.exists() {
        anyhow::bail!("파일을 찾을 수 없습니다: {}", path.display());
    }
    let bytes = std::fs::read(path)
        .with_context(|| format!("파일을 읽을 수 없습니다: {}", path.display()))?;

    let result = mediatag::extract(&bytes);
    if let Err(e) = &result {
        tracing::debug!("{}: {}", path.display(), e);
    }

    Ok(AudioFile {
        path: path.to_path_buf(),
        result,
    })
}
