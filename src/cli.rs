use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use dialoguer::{Input, Select};
use mediatag::{MetadataRecord, ParseError};
use serde::Serialize;

use crate::config::{self, OutputFormat};
use crate::scanner::{self, AudioFile};

#[derive(Parser)]
#[command(
    name = "mediatag",
    about = "MP3/MP4 오디오 파일의 태그 메타데이터 조회 도구"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 로그 출력 수준 (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 파일 하나의 태그 표시
    Show {
        /// 오디오 파일
        file: PathBuf,
        /// JSON으로 출력
        #[arg(long)]
        json: bool,
        /// JSON 출력에 앨범 아트를 base64로 포함
        #[arg(long = "with-art")]
        with_art: bool,
    },
    /// 디렉토리를 스캔하여 태그 현황 표시
    Scan {
        /// 스캔할 디렉토리
        directory: PathBuf,
        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },
    /// 앨범 아트를 이미지 파일로 저장
    Art {
        /// 오디오 파일
        file: PathBuf,
        /// 저장할 경로
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 출력 형식과 스캔 옵션 설정
    Config,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Show {
            file,
            json,
            with_art,
        } => cmd_show(&file, json, with_art),
        Commands::Scan { directory, json } => cmd_scan(&directory, json),
        Commands::Art { file, output } => cmd_art(&file, output),
        Commands::Config => cmd_config(),
    }
}

/// JSON 출력용 레코드. 아트는 요청 시에만 base64로 포함한다.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordJson<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(flatten)]
    record: Option<&'a MetadataRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artwork_mime: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    artwork: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> RecordJson<'a> {
    fn new(record: &'a MetadataRecord, with_art: bool) -> Self {
        let artwork = record.artwork.as_deref().filter(|_| with_art);
        Self {
            file: None,
            record: Some(record),
            artwork_mime: record.artwork_format().map(|f| f.mime_type()),
            artwork: artwork.map(|bytes| BASE64.encode(bytes)),
            error: None,
        }
    }

    /// 읽기에 실패한 파일: 경로와 오류만 담는다.
    fn failed(file: String, err: &ParseError) -> Self {
        Self {
            file: Some(file),
            record: None,
            artwork_mime: None,
            artwork: None,
            error: Some(err.to_string()),
        }
    }
}

fn use_json(flag: bool) -> bool {
    flag || config::load_config().output.format == OutputFormat::Json
}

fn cmd_show(file: &Path, json: bool, with_art: bool) -> Result<()> {
    let audio = scanner::load_audio_file(file)?;
    let record = audio
        .result
        .with_context(|| format!("태그를 읽을 수 없습니다: {}", file.display()))?;

    if use_json(json) {
        let out = RecordJson::new(&record, with_art);
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if !record.is_recognized() {
        println!("{}: 지원하는 태그 형식이 아닙니다", file.display());
        return Ok(());
    }

    println!("{}", record_table(&record));
    Ok(())
}

fn record_table(record: &MetadataRecord) -> Table {
    let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    let artwork = match (&record.artwork, record.artwork_format()) {
        (Some(bytes), Some(format)) => format!("{} ({} bytes)", format.mime_type(), bytes.len()),
        (Some(bytes), None) => format!("알 수 없는 형식 ({} bytes)", bytes.len()),
        (None, _) => "없음".to_string(),
    };

    let mut table = Table::new();
    table.set_header(vec!["항목", "값"]);
    table.add_row(vec![Cell::new("형식"), Cell::new(record.media_type)]);
    table.add_row(vec![Cell::new("제목"), Cell::new(record.display_title())]);
    table.add_row(vec![Cell::new("아티스트"), Cell::new(record.display_artist())]);
    table.add_row(vec![Cell::new("앨범"), Cell::new(record.display_album())]);
    table.add_row(vec![Cell::new("장르"), Cell::new(optional(record.genre.clone()))]);
    table.add_row(vec![
        Cell::new("연도"),
        Cell::new(optional(record.year.map(|y| y.to_string()))),
    ]);
    table.add_row(vec![
        Cell::new("트랙"),
        Cell::new(optional(record.track_number.map(|n| n.to_string()))),
    ]);
    table.add_row(vec![
        Cell::new("디스크"),
        Cell::new(optional(record.disc_number.map(|n| n.to_string()))),
    ]);
    table.add_row(vec![Cell::new("앨범 아트"), Cell::new(artwork)]);
    table
}

fn cmd_scan(directory: &Path, json: bool) -> Result<()> {
    let cfg = config::load_config();
    let files = scanner::scan_directory(directory, &cfg.scan.extensions)?;

    if use_json(json) {
        println!("{}", serde_json::to_string_pretty(&scan_json(&files))?);
        return Ok(());
    }

    if files.is_empty() {
        println!("{}에서 오디오 파일을 찾을 수 없습니다", directory.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["파일", "형식", "제목", "아티스트", "앨범", "상태"]);

    for file in &files {
        let (media_type, title, artist, album) = match file.record().filter(|r| r.is_recognized()) {
            Some(r) => (
                r.media_type.to_string(),
                r.display_title().to_string(),
                r.display_artist().to_string(),
                r.display_album().to_string(),
            ),
            None => ("-".to_string(), "-".to_string(), "-".to_string(), "-".to_string()),
        };

        table.add_row(vec![
            Cell::new(file.filename()),
            Cell::new(&media_type),
            Cell::new(&title),
            Cell::new(&artist),
            Cell::new(&album),
            Cell::new(file.status()),
        ]);
    }

    let failed = files.iter().filter(|f| f.result.is_err()).count();
    let tagged = files.iter().filter(|f| f.has_tags()).count();

    println!("{table}");
    println!(
        "\n총 {} 파일 (태그 있음: {}, 태그 없음: {}, 오류: {})",
        files.len(),
        tagged,
        files.len() - tagged - failed,
        failed,
    );

    Ok(())
}

fn scan_json(files: &[AudioFile]) -> Vec<RecordJson<'_>> {
    files
        .iter()
        .map(|file| {
            let path = file.path.display().to_string();
            match &file.result {
                Ok(record) => RecordJson {
                    file: Some(path),
                    ..RecordJson::new(record, false)
                },
                Err(e) => RecordJson::failed(path, e),
            }
        })
        .collect()
}

fn cmd_art(file: &Path, output: Option<PathBuf>) -> Result<()> {
    let audio = scanner::load_audio_file(file)?;
    let record = audio
        .result
        .with_context(|| format!("태그를 읽을 수 없습니다: {}", file.display()))?;

    let Some(artwork) = record.artwork.as_deref() else {
        println!("{}에 앨범 아트가 없습니다", file.display());
        return Ok(());
    };

    let path = match output {
        Some(path) => path,
        None => default_art_path(file, &record, config::load_config().output.artwork_dir),
    };

    std::fs::write(&path, artwork)
        .with_context(|| format!("앨범 아트를 저장할 수 없습니다: {}", path.display()))?;
    println!("앨범 아트를 저장했습니다: {} ({} bytes)", path.display(), artwork.len());
    Ok(())
}

/// `<디렉토리>/<파일 이름>.<이미지 확장자>`. 형식을 모르면 `.bin`.
fn default_art_path(
    file: &Path,
    record: &MetadataRecord,
    artwork_dir: Option<PathBuf>,
) -> PathBuf {
    let dir = artwork_dir
        .or_else(|| file.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("artwork");
    let extension = record.artwork_format().map_or("bin", |f| f.extension());
    dir.join(format!("{stem}.{extension}"))
}

fn cmd_config() -> Result<()> {
    let mut cfg = config::load_config();

    println!("mediatag 설정\n");

    let formats: Vec<&str> = OutputFormat::ALL.iter().map(|f| f.as_str()).collect();
    let current = OutputFormat::ALL
        .iter()
        .position(|f| *f == cfg.output.format)
        .unwrap_or(0);
    let selection = Select::new()
        .with_prompt("기본 출력 형식")
        .items(&formats)
        .default(current)
        .interact()?;
    cfg.output.format = OutputFormat::ALL[selection];

    let current_dir = cfg
        .output
        .artwork_dir
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let artwork_dir: String = Input::new()
        .with_prompt("앨범 아트 저장 디렉토리 (비우면 음악 파일 위치)")
        .with_initial_text(current_dir)
        .allow_empty(true)
        .interact_text()?;
    cfg.output.artwork_dir = Some(artwork_dir.trim())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);

    let extensions: String = Input::new()
        .with_prompt("스캔할 확장자 (쉼표로 구분)")
        .with_initial_text(cfg.scan.extensions.join(","))
        .interact_text()?;
    let extensions: Vec<String> = extensions
        .split(',')
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    if !extensions.is_empty() {
        cfg.scan.extensions = extensions;
    }

    config::save_config(&cfg)?;
    println!("\n설정이 저장되었습니다!");
    Ok(())
}
