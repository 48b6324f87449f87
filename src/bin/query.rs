use csra_base::{AnnotChunkId, Blob, BlobRequest, Choice, ChunkData, ChunkId, CsraLoader, LoaderParams};
use csra_base::utils::CancelToken;

use std::io::Write;
use std::time::Instant;
use std::{env, io, process};

use getopts::Options;

//-----------------------------------------------------------------------------

fn main() -> Result<(), String> {
    let start_time = Instant::now();
    env_logger::init();

    // Parse arguments.
    let config = Config::new()?;

    // Create the loader.
    let loader = CsraLoader::new(config.params.clone()).map_err(|x| x.to_string())?;
    if loader.is_fixed() {
        eprintln!("Using {} fixed archives", loader.fixed_archives().len());
    } else {
        eprintln!("Loading archives from {}", config.params.dir_path.display());
    }

    let mut output = io::stdout();
    let cancel = CancelToken::new();
    for id in config.ids.iter() {
        let requests = loader.get_required_blobs(id, config.choice, &cancel).map_err(|x| x.to_string())?;
        if requests.is_empty() {
            writeln!(output, "{}\tunknown", id).map_err(|x| x.to_string())?;
            continue;
        }
        if let Some(length) = loader.sequence_length(id).map_err(|x| x.to_string())? {
            writeln!(output, "{}\tlength {}", id, length).map_err(|x| x.to_string())?;
        }
        for request in requests.iter() {
            writeln!(output, "{}\t{}", id, describe_request(request)).map_err(|x| x.to_string())?;
            if config.load {
                load_request(&loader, request, &cancel, &mut output)?;
            }
        }
    }

    let end_time = Instant::now();
    let seconds = end_time.duration_since(start_time).as_secs_f64();
    eprintln!("Used {:.3} seconds", seconds);

    Ok(())
}

//-----------------------------------------------------------------------------

pub struct Config {
    pub params: LoaderParams,
    pub choice: Choice,
    pub load: bool,
    pub ids: Vec<String>,
}

impl Config {
    pub fn new() -> Result<Config, String> {
        let args: Vec<String> = env::args().collect();
        let program = args[0].clone();
        let header = format!("Usage: {} [options] path id1 [id2 ...]", program);

        let mut opts = Options::new();
        opts.optflag("h", "help", "print this help");
        opts.optmulti("f", "file", "use this archive in the path directory (fixed mode; may repeat)", "NAME");
        opts.optopt("c", "choice", "all, blob, bioseq, sequence, annot, graph, align, or orphan (default: all)", "STR");
        opts.optopt("q", "min-quality", "skip alignments with lower mapping quality (default: 0)", "INT");
        opts.optopt("s", "spot-groups", "separate up to this many spot groups (default: 0)", "INT");
        opts.optopt("n", "annot-name", "base name for annotations", "STR");
        opts.optopt("r", "reads-per-blob", "number of spots in a read blob (default: 1)", "INT");
        opts.optflag("", "no-pileup", "do not generate pileup graphs");
        opts.optflag("", "quality-graphs", "generate read quality graphs");
        opts.optflag("", "spot-read-align", "load read alignments with the reads");
        opts.optflag("", "file-name-only", "use the file name instead of the path in fixed mode identifiers");
        opts.optflag("l", "load", "load the required blobs and chunks");
        let matches = opts.parse(&args[1..]).map_err(|x| x.to_string())?;

        if matches.opt_present("h") {
            eprint!("{}", opts.usage(&header));
            process::exit(0);
        }
        if matches.free.len() < 2 {
            eprint!("{}", opts.usage(&header));
            process::exit(1);
        }

        let mut params = LoaderParams::with_dir(&matches.free[0]);
        params.csra_files = matches.opt_strs("f");
        if let Some(s) = matches.opt_str("q") {
            params.min_map_quality = s.parse::<u8>().map_err(|x| format!("--min-quality: {}", x))?;
        }
        if let Some(s) = matches.opt_str("s") {
            params.spot_groups = s.parse::<usize>().map_err(|x| format!("--spot-groups: {}", x))?;
        }
        if let Some(s) = matches.opt_str("n") {
            params.annot_name = Some(s);
        }
        if let Some(s) = matches.opt_str("r") {
            params.reads_per_blob = s.parse::<u64>().map_err(|x| format!("--reads-per-blob: {}", x))?;
        }
        if matches.opt_present("no-pileup") {
            params.pileup_graphs = false;
        }
        if matches.opt_present("quality-graphs") {
            params.quality_graphs = true;
        }
        if matches.opt_present("spot-read-align") {
            params.spot_read_align = true;
        }
        if matches.opt_present("file-name-only") {
            params.path_in_id = false;
        }
        let params = params.override_from_env().map_err(|x| x.to_string())?;

        let choice = match matches.opt_str("c") {
            Some(s) => parse_choice(&s).ok_or_else(|| format!("Invalid choice: {}", s))?,
            None => Choice::All,
        };
        let load = matches.opt_present("l");
        let ids = matches.free[1..].to_vec();

        Ok(Config { params, choice, load, ids })
    }
}

fn parse_choice(value: &str) -> Option<Choice> {
    match value {
        "all" => Some(Choice::All),
        "blob" => Some(Choice::Blob),
        "bioseq" => Some(Choice::Bioseq),
        "sequence" => Some(Choice::Sequence),
        "annot" => Some(Choice::Annot),
        "graph" => Some(Choice::Graph),
        "align" => Some(Choice::Align),
        "orphan" => Some(Choice::OrphanAnnot),
        _ => None,
    }
}

//-----------------------------------------------------------------------------

fn describe_request(request: &BlobRequest) -> String {
    if request.chunks.is_empty() {
        request.blob_id.to_string()
    } else {
        let chunks: Vec<String> = request.chunks.iter().map(|x| x.to_string()).collect();
        format!("{} [{}]", request.blob_id, chunks.join(", "))
    }
}

// Loads the blob and its chunks, writing a summary line for each.
fn load_request<W: Write>(loader: &CsraLoader, request: &BlobRequest, cancel: &CancelToken, output: &mut W) -> Result<(), String> {
    let blob_id = &request.blob_id;
    let blob = loader.load_blob(blob_id, cancel).map_err(|x| x.to_string())?;
    let mut chunks: Vec<ChunkId> = Vec::new();
    match &blob {
        Blob::Annot(blob) => {
            writeln!(output, "  annotation blob with {} chunks", blob.chunks.len()).map_err(|x| x.to_string())?;
            chunks.push(ChunkId::Annot(AnnotChunkId::Main));
        },
        Blob::RefSeq(blob) => {
            writeln!(output, "  {}, {} bp, {} data chunks", blob.title, blob.length, blob.chunks.len()).map_err(|x| x.to_string())?;
            chunks.extend((0..blob.chunks.len()).map(ChunkId::RefSeq));
        },
        Blob::Reads(blob) => {
            for read in blob.reads.iter() {
                let sequence = String::from_utf8_lossy(&read.sequence);
                writeln!(output, "  {}\t{}\t{}", read.id, read.spot_group, sequence).map_err(|x| x.to_string())?;
            }
        },
        Blob::ReadsAlign(blob) => {
            writeln!(output, "  {}: {} alignments", blob.annot.name, blob.annot.alignments().len()).map_err(|x| x.to_string())?;
        },
    }

    // Follow the chunks registered by the main chunk unless the request names them.
    let mut i = 0;
    while i < chunks.len() {
        let chunk_id = chunks[i];
        i += 1;
        if let ChunkId::Annot(id) = chunk_id {
            if !request.chunks.is_empty() && !request.chunks.contains(&id) {
                continue;
            }
        }
        match loader.load_chunk(blob_id, chunk_id, cancel).map_err(|x| x.to_string())? {
            ChunkData::Annot(chunk) => {
                for annot in chunk.annots.iter() {
                    writeln!(
                        output, "  {}: {} alignments, {} graphs",
                        annot.name, annot.alignments().len(), annot.graphs().len()
                    ).map_err(|x| x.to_string())?;
                }
                writeln!(output, "  chunk {}: {} bytes", chunk.chunk_id, chunk.used_memory).map_err(|x| x.to_string())?;
                chunks.extend(chunk.chunks.iter().map(|x| ChunkId::Annot(x.chunk_id)));
            },
            ChunkData::RefSeq(chunk) => {
                writeln!(output, "  data chunk {}: {}..{}", chunk.index, chunk.range.start, chunk.range.end).map_err(|x| x.to_string())?;
            },
        }
    }

    Ok(())
}

//-----------------------------------------------------------------------------
