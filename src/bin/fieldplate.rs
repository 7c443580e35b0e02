//! fieldplate command line: rasterize, inspect and export templates headlessly.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use fieldplate::{
    EngineConfig, LabelCatalog, OverlayCanvas, PageBitmap, RegionRect, SourceDocument, Template,
    TemplateEngine, TemplateEngineBuilder, TemplateError, TemplateLibrary,
};
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug)]
#[command(name = "fieldplate")]
#[command(version, about = "Turn PDFs and scanned pages into annotated field templates")]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Render scale, overriding the configuration (1.0 = one pixel per PDF point)
    #[arg(long, global = true)]
    scale: Option<f32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rasterize every page and report its size
    Rasterize(RasterizeArgs),
    /// Print page count, fingerprint and page sizes
    Inspect(SourceArgs),
    /// Replay field placements over the pages and export a template
    Export(ExportArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// A PDF, or one or more PNG/JPEG files (one page each)
    #[arg(required = true, num_args = 1..)]
    input: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct RasterizeArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Page cache file reused across runs
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Write page-<n>.png files into this directory
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Label catalog (JSON array of categories)
    #[arg(long)]
    catalog: PathBuf,

    /// Field placements to replay (JSON array)
    #[arg(long)]
    annotations: PathBuf,

    #[arg(long)]
    name: String,

    #[arg(long, default_value = "")]
    description: String,

    /// Template library to add the result to
    #[arg(long)]
    library: Option<PathBuf>,

    /// Write the template JSON here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long)]
    cache: Option<PathBuf>,
}

/// One field placed on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Placement {
    page: usize,
    category: String,
    field: String,
    rect: RegionRect,
}

#[derive(Debug, Serialize)]
struct PageReport {
    page_index: usize,
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct InspectReport {
    kind: String,
    fingerprint: String,
    page_count: usize,
    pages: Vec<PageReport>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("fieldplate: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), TemplateError> {
    match cli.command {
        Command::Inspect(args) => {
            let document = load_source(&args.input)?;
            let report = inspect(&document)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Rasterize(args) => {
            let mut engine = engine_from(cli.config.as_deref(), cli.scale)?;
            let document = load_source(&args.source.input)?;
            let pages = rasterize(&mut engine, &document, args.cache.as_deref()).await?;
            if let Some(dir) = &args.out_dir {
                write_pngs(&pages, dir)?;
            }
            for page in &pages {
                println!("page {}: {}x{}", page.page_index, page.width, page.height);
            }
        }
        Command::Export(args) => {
            let mut engine = engine_from(cli.config.as_deref(), cli.scale)?;
            let document = load_source(&args.source.input)?;
            let catalog = LabelCatalog::load(&args.catalog)?;
            let placements = load_placements(&args.annotations)?;
            let pages = rasterize(&mut engine, &document, args.cache.as_deref()).await?;
            let template = export(
                &mut engine,
                &pages,
                &catalog,
                &placements,
                &args.name,
                &args.description,
            )
            .await?;

            if let Some(path) = &args.library {
                let mut library = TemplateLibrary::load(path)?;
                if library.insert(template.clone()).is_some() {
                    log::info!("replaced template {:?} in {}", template.name, path.display());
                }
                library.save()?;
            }
            let json = template.to_json_pretty()?;
            match &args.out {
                Some(path) => std::fs::write(path, json)?,
                None => println!("{json}"),
            }
        }
    }
    Ok(())
}

fn engine_from(config: Option<&Path>, scale: Option<f32>) -> Result<TemplateEngine, TemplateError> {
    let config = match config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let mut builder = TemplateEngineBuilder::from_config(&config);
    if let Some(scale) = scale {
        builder = builder.render_scale(scale);
    }
    builder.build()
}

fn load_source(inputs: &[PathBuf]) -> Result<SourceDocument, TemplateError> {
    match inputs {
        [] => Err(TemplateError::InvalidConfiguration(
            "no input files given".to_string(),
        )),
        [single] => SourceDocument::from_path(single),
        many => SourceDocument::from_image_paths(many),
    }
}

fn inspect(document: &SourceDocument) -> Result<InspectReport, TemplateError> {
    let handle = document.open()?;
    let source = handle.source()?;
    let mut pages = Vec::with_capacity(source.page_count());
    for page_index in 0..source.page_count() {
        let size = source.page_size(page_index)?;
        pages.push(PageReport {
            page_index,
            width: size.width,
            height: size.height,
        });
    }
    Ok(InspectReport {
        kind: format!("{:?}", document.kind()).to_lowercase(),
        fingerprint: document.fingerprint(),
        page_count: pages.len(),
        pages,
    })
}

async fn rasterize(
    engine: &mut TemplateEngine,
    document: &SourceDocument,
    cache: Option<&Path>,
) -> Result<Vec<PageBitmap>, TemplateError> {
    match cache {
        Some(path) => engine.rasterize_cached(document, path).await,
        None => engine.rasterize(document).await,
    }
}

fn write_pngs(pages: &[PageBitmap], dir: &Path) -> Result<(), TemplateError> {
    std::fs::create_dir_all(dir)?;
    for page in pages {
        let path = dir.join(format!("page-{}.png", page.page_index + 1));
        std::fs::write(&path, page.png_bytes()?)?;
        log::debug!("wrote {}", path.display());
    }
    Ok(())
}

fn load_placements(path: &Path) -> Result<Vec<Placement>, TemplateError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

// Placements are replayed in file order, the way a user would click through them.
async fn export(
    engine: &mut TemplateEngine,
    pages: &[PageBitmap],
    catalog: &LabelCatalog,
    placements: &[Placement],
    name: &str,
    description: &str,
) -> Result<Template, TemplateError> {
    let mut session = engine.start_session(pages.len(), OverlayCanvas::new(pages.to_vec()));
    for placement in placements {
        if placement.page >= pages.len() {
            return Err(TemplateError::InvalidConfiguration(format!(
                "placement of {:?} targets page {} of a {}-page document",
                placement.field,
                placement.page,
                pages.len()
            )));
        }
        let field = catalog.field(&placement.category, &placement.field)?;
        session.go_to_page(placement.page);
        session.select_field(&field)?;
        session.adapter_mut().complete_region(placement.rect)?;
    }
    engine.export(&mut session, pages, name, description).await
}
