use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use personrs::EngineConfig;
use personrs::core::{
    ClusterOptions, Face, HierarchicalClusterer, IdentityResolver, Linkage, PersonCluster, Photo,
    SplitOptions,
};
use personrs::services::{
    PeopleQuery, PeopleService, PersonIdentityStore, SearchService, SledLabelStore, SortBy,
    SortOrder,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(name = "personrs", version, about = "Group photo faces into people")]
struct Cli {
    /// Engine config file (JSON)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Label database directory (default: ~/Documents/Personrs/labels.db)
    #[arg(long, global = true, value_name = "DIR")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cluster detected faces into people
    Cluster {
        /// Face JSON file, or a directory of them
        #[arg(short, long, value_name = "PATH")]
        faces: PathBuf,
        /// Where to write the resulting people
        #[arg(short, long, value_name = "FILE")]
        out: PathBuf,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        min_size: Option<usize>,
        #[arg(long)]
        max_clusters: Option<usize>,
        /// single, complete or average
        #[arg(long)]
        linkage: Option<Linkage>,
    },

    /// Assign a newly detected face to an existing person
    Assign {
        #[arg(long, value_name = "FILE")]
        face: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        clusters: PathBuf,
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Attach photos to the people appearing in them
    Link {
        #[arg(short, long, value_name = "FILE")]
        clusters: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        photos: PathBuf,
    },

    /// Name a person
    Label {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        /// People file whose label ids should be refreshed
        #[arg(short, long, value_name = "FILE")]
        clusters: Option<PathBuf>,
    },

    /// Remove a person's name
    Unlabel {
        #[arg(long)]
        id: String,
        /// People file whose label ids should be refreshed
        #[arg(short, long, value_name = "FILE")]
        clusters: Option<PathBuf>,
    },

    /// Merge two people into one
    Merge {
        #[arg(short, long, value_name = "FILE")]
        clusters: PathBuf,
        #[arg(long)]
        first: String,
        #[arg(long)]
        second: String,
        /// Name for the merged person
        #[arg(long)]
        name: Option<String>,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Split a person that mixes several identities
    Split {
        #[arg(short, long, value_name = "FILE")]
        clusters: PathBuf,
        #[arg(long)]
        id: String,
        #[arg(long)]
        threshold: Option<f64>,
        /// One name per resulting person, comma separated
        #[arg(long, value_delimiter = ',')]
        names: Option<Vec<String>>,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Search people
    People {
        #[arg(short, long, value_name = "FILE")]
        clusters: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = 0)]
        min_photos: usize,
        /// name, photo-count, confidence or last-seen
        #[arg(long, default_value = "name")]
        sort_by: SortBy,
        #[arg(long, default_value = "asc")]
        order: SortOrder,
    },

    /// Library statistics
    Stats {
        #[arg(short, long, value_name = "FILE")]
        clusters: PathBuf,
    },

    /// Suggest corrections
    Suggest {
        #[command(subcommand)]
        command: SuggestCmd,
    },
}

#[derive(Subcommand, Debug)]
enum SuggestCmd {
    /// People that are probably the same person
    Merges {
        #[arg(short, long, value_name = "FILE")]
        clusters: PathBuf,
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// People that probably mix several identities
    Splits {
        #[arg(short, long, value_name = "FILE")]
        clusters: PathBuf,
        #[arg(long)]
        min_faces: Option<usize>,
        #[arg(long)]
        max_similarity: Option<f64>,
    },
}

/// A face file holds either one face or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum FaceFile {
    Many(Vec<Face>),
    One(Face),
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {:?}", path))?,
        None => EngineConfig::default(),
    };
    if let Some(store) = &cli.store {
        config.store_path = Some(store.clone());
    }

    match cli.command {
        Commands::Cluster {
            faces,
            out,
            threshold,
            min_size,
            max_clusters,
            linkage,
        } => {
            let options = ClusterOptions {
                similarity_threshold: threshold.unwrap_or(config.clustering.similarity_threshold),
                min_cluster_size: min_size.unwrap_or(config.clustering.min_cluster_size),
                max_clusters: max_clusters.unwrap_or(config.clustering.max_clusters),
                linkage: linkage.unwrap_or(config.clustering.linkage),
            };

            println!("▶ Loading faces from: {}", faces.display());
            let faces = load_faces(&faces)?;
            println!("▶ Clustering {} faces ({} linkage)…", faces.len(), options.linkage);

            let clusterer = HierarchicalClusterer::cosine();
            let spinner = spinner("Clustering…")?;
            let result = benchmark("clustering", || clusterer.cluster_faces(&faces, &options));
            spinner.finish_and_clear();
            let result = result?;

            if result.clusters.is_empty() {
                println!("No people found.");
            } else {
                println!("Found {} people:", result.clusters.len());
                for (i, cluster) in result.clusters.iter().enumerate() {
                    println!(
                        " {:>3}. {} ({} faces, confidence {:.3})",
                        i + 1,
                        cluster.id,
                        cluster.face_count(),
                        cluster.confidence
                    );
                }
            }
            if !result.unclustered_faces.is_empty() {
                println!("⚠️  {} face(s) left unclustered", result.unclustered_faces.len());
            }

            save_clusters(&out, &result.clusters)?;
            println!("✅ Wrote people to {}", out.display());
        }

        Commands::Assign {
            face,
            clusters,
            threshold,
        } => {
            let face: Face = read_json(&face)?;
            let mut people = load_clusters(&clusters)?;
            let resolver = resolver(&config);

            let assignment = resolver.add_face_to_cluster(
                &face,
                &people,
                threshold.unwrap_or(config.assignment_threshold),
            )?;
            match assignment.cluster {
                None => println!("⚠️  Face {} has no embedding; not assigned", face.id),
                Some(cluster) if assignment.is_new_cluster => {
                    println!("✨ Face {} starts a new person {}", face.id, cluster.id);
                    people.push(cluster);
                }
                Some(cluster) => {
                    println!("🔗 Face {} joins {}", face.id, cluster.id);
                    let id = cluster.id.clone();
                    replace_clusters(&mut people, &[id.as_str()], vec![cluster]);
                }
            }
            save_clusters(&clusters, &people)?;
        }

        Commands::Link { clusters, photos } => {
            let people = load_clusters(&clusters)?;
            let photos: Vec<Photo> = read_json(&photos)?;
            let linked = resolver(&config).link_clusters_to_photos(&people, &photos);
            let total: usize = linked.iter().map(PersonCluster::photo_count).sum();
            println!("🔗 Linked {} photo backlinks across {} people", total, linked.len());
            save_clusters(&clusters, &linked)?;
        }

        Commands::Label { id, name, clusters } => {
            let mut identities = open_identities(&config)?;
            let label = identities.label_person(&id, &name)?;
            println!("🏷️  {} → {}", label.cluster_id, label.name);
            if let Some(clusters) = clusters {
                refresh_label_ids(&clusters, &identities)?;
            }
        }

        Commands::Unlabel { id, clusters } => {
            let mut identities = open_identities(&config)?;
            if identities.unlabel_person(&id)? {
                println!("🧹 Removed label from {}", id);
            } else {
                println!("{} had no label", id);
            }
            if let Some(clusters) = clusters {
                refresh_label_ids(&clusters, &identities)?;
            }
        }

        Commands::Merge {
            clusters,
            first,
            second,
            name,
            yes,
        } => {
            let mut people = load_clusters(&clusters)?;
            let a = find_cluster(&people, &first)?.clone();
            let b = find_cluster(&people, &second)?.clone();

            let a_faces: HashSet<&str> = a.faces.iter().map(|f| f.id.as_str()).collect();
            if let Some(shared) = b.faces.iter().find(|f| a_faces.contains(f.id.as_str())) {
                bail!("{} and {} share face {}", first, second, shared.id);
            }

            if !yes && !confirm(&format!("Merge {} and {}?", first, second))? {
                println!("Aborted.");
                return Ok(());
            }

            let mut service = PeopleService::new(resolver(&config), open_identities(&config)?);
            let merged = service.merge_people(&a, &b, name.as_deref())?;
            let label = service.label_of(&merged)?;
            println!(
                "✨ Merged into {} ({} faces){}",
                merged.id,
                merged.face_count(),
                label.map(|l| format!(", labeled {}", l.name)).unwrap_or_default()
            );

            replace_clusters(&mut people, &[first.as_str(), second.as_str()], vec![merged]);
            save_clusters(&clusters, &people)?;
        }

        Commands::Split {
            clusters,
            id,
            threshold,
            names,
            yes,
        } => {
            let mut people = load_clusters(&clusters)?;
            let target = find_cluster(&people, &id)?.clone();

            if !yes && !confirm(&format!("Split {} ({} faces)?", id, target.face_count()))? {
                println!("Aborted.");
                return Ok(());
            }

            let mut service = PeopleService::new(resolver(&config), open_identities(&config)?);
            let options = split_options(&config, threshold);
            let fragments = service.split_person(&target, &options, names.as_deref())?;
            if fragments.len() < 2 {
                println!("{} looks like a single person; nothing to split", id);
                return Ok(());
            }

            println!("✂️  Split {} into {} people:", id, fragments.len());
            for fragment in &fragments {
                let name = service.label_of(fragment)?.map(|l| l.name);
                println!(
                    "   ▶ {} ({} faces){}",
                    fragment.id,
                    fragment.face_count(),
                    name.map(|n| format!(" {}", n)).unwrap_or_default()
                );
            }

            replace_clusters(&mut people, &[id.as_str()], fragments);
            save_clusters(&clusters, &people)?;
        }

        Commands::People {
            clusters,
            name,
            min_photos,
            sort_by,
            order,
        } => {
            let people = load_clusters(&clusters)?;
            let identities = open_identities(&config)?;
            let query = PeopleQuery {
                name,
                min_photos,
                sort_by,
                sort_order: order,
            };

            let found = SearchService::cosine().search_people(&people, &identities, &query)?;
            if found.is_empty() {
                println!("No matching people.");
            }
            for cluster in found {
                let name = identities.name_of(&cluster.id)?;
                println!(
                    "{:<40} {:<20} faces={:<4} photos={:<4} confidence={:.3}",
                    cluster.id,
                    name.as_deref().unwrap_or("(unnamed)"),
                    cluster.face_count(),
                    cluster.photo_count(),
                    cluster.confidence
                );
            }
        }

        Commands::Stats { clusters } => {
            let people = load_clusters(&clusters)?;
            let identities = open_identities(&config)?;
            let stats = SearchService::cosine().get_person_stats(&people, &identities)?;
            println!("{}", stats);
        }

        Commands::Suggest { command } => match command {
            SuggestCmd::Merges {
                clusters,
                threshold,
            } => {
                let people = load_clusters(&clusters)?;
                let identities = open_identities(&config)?;
                let candidates = SearchService::cosine().suggest_merge_candidates(
                    &people,
                    &identities,
                    threshold.unwrap_or(config.merge_suggestion_threshold),
                )?;
                if candidates.is_empty() {
                    println!("No merge suggestions.");
                }
                for candidate in candidates {
                    println!(
                        "🔀 {} + {} (similarity {:.3})",
                        candidate.first.id, candidate.second.id, candidate.similarity
                    );
                }
            }

            SuggestCmd::Splits {
                clusters,
                min_faces,
                max_similarity,
            } => {
                let people = load_clusters(&clusters)?;
                let candidates = SearchService::cosine().suggest_split_candidates(
                    &people,
                    min_faces.unwrap_or(config.split_suggestion_min_faces),
                    max_similarity.unwrap_or(config.split_suggestion_max_similarity),
                )?;
                if candidates.is_empty() {
                    println!("No split suggestions.");
                }
                for candidate in candidates {
                    println!(
                        "✂️  {} ({} faces, confidence {:.3}, internal similarity {:.3})",
                        candidate.cluster.id,
                        candidate.cluster.face_count(),
                        candidate.cluster.confidence,
                        candidate.internal_similarity
                    );
                }
            }
        },
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolver(config: &EngineConfig) -> IdentityResolver {
    let clusterer =
        HierarchicalClusterer::with_defaults(Default::default(), config.clustering.clone());
    IdentityResolver::new(clusterer).with_split_threshold_delta(config.split_threshold_delta)
}

/// Split with the configured linkage; the threshold defaults to the
/// resolver's stricter split threshold.
fn split_options(config: &EngineConfig, threshold: Option<f64>) -> SplitOptions {
    SplitOptions {
        threshold,
        linkage: config.clustering.linkage,
        ..Default::default()
    }
}

fn open_identities(config: &EngineConfig) -> Result<PersonIdentityStore<SledLabelStore>> {
    let path = config.resolve_store_path()?;
    let store = SledLabelStore::open(&path)
        .with_context(|| format!("Failed to open label database {:?}", path))?;
    Ok(PersonIdentityStore::new(store))
}

fn confirm(prompt: &str) -> Result<bool> {
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

fn load_clusters(path: &Path) -> Result<Vec<PersonCluster>> {
    read_json(path)
}

fn save_clusters(path: &Path, clusters: &[PersonCluster]) -> Result<()> {
    let content = serde_json::to_string_pretty(clusters)?;
    fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
}

fn refresh_label_ids(path: &Path, identities: &PersonIdentityStore<SledLabelStore>) -> Result<()> {
    let mut people = load_clusters(path)?;
    let changed = identities.sync_label_ids(&mut people)?;
    if changed > 0 {
        save_clusters(path, &people)?;
        println!("🔄 Refreshed {} label id(s) in {}", changed, path.display());
    }
    Ok(())
}

fn find_cluster<'a>(clusters: &'a [PersonCluster], id: &str) -> Result<&'a PersonCluster> {
    clusters
        .iter()
        .find(|c| c.id == id)
        .with_context(|| format!("No person with id {}", id))
}

/// Swap out the clusters with `old_ids` for `replacements`, keeping the
/// position of the first replaced cluster.
fn replace_clusters(
    clusters: &mut Vec<PersonCluster>,
    old_ids: &[&str],
    replacements: Vec<PersonCluster>,
) {
    let position = clusters
        .iter()
        .position(|c| old_ids.contains(&c.id.as_str()))
        .unwrap_or(clusters.len());
    clusters.retain(|c| !old_ids.contains(&c.id.as_str()));
    let position = position.min(clusters.len());
    clusters.splice(position..position, replacements);
}

/// Read faces from a JSON file, or from every `.json` file under a directory.
fn load_faces(path: &Path) -> Result<Vec<Face>> {
    if path.is_file() {
        return Ok(match read_json::<FaceFile>(path)? {
            FaceFile::Many(faces) => faces,
            FaceFile::One(face) => vec![face],
        });
    }

    let spinner = spinner("Scanning for face files…")?;
    let mut faces = Vec::new();
    for entry in WalkDir::new(path).into_iter().filter_map(Result::ok) {
        let file = entry.path();
        let is_json = file
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if file.is_file() && is_json {
            match read_json::<FaceFile>(file)? {
                FaceFile::Many(more) => faces.extend(more),
                FaceFile::One(face) => faces.push(face),
            }
        }
        spinner.tick();
    }
    spinner.finish_with_message("Scan complete");
    Ok(faces)
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}
