use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use vk_wall_lib::{Thresholds, WallClient, WallError, WallParams};

#[derive(Parser)]
#[command(name = "vk-wall")]
#[command(about = "Print the popular original posts from a VK user's or community's wall")]
#[command(allow_negative_numbers = true)]
struct Args {
    /// Service access key to use. Must be obtained from VK.com
    access_token: String,

    /// The user or community ID (community IDs are negative)
    owner_id: i64,

    /// wall.get filter (owner, others, all, ...)
    #[arg(long, default_value = "owner")]
    filter: String,

    /// Number of posts to skip
    #[arg(long, default_value_t = 0)]
    offset: u32,

    /// Number of posts to request
    #[arg(long, default_value_t = 100)]
    count: u32,

    /// VK API version
    #[arg(long, default_value = "5.103")]
    version: String,

    /// Only print posts with more likes than this (-1 includes posts without likes)
    #[arg(long = "min_likes", visible_alias = "min-likes", default_value_t = 0)]
    min_likes: i64,

    /// Only print posts with more reposts than this (-1 includes posts without reposts)
    #[arg(long = "min_reposts", visible_alias = "min-reposts", default_value_t = 0)]
    min_reposts: i64,

    /// Print only the post texts (the repost threshold is not applied)
    #[arg(long)]
    texts_only: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn params(&self) -> WallParams {
        WallParams::new(&self.access_token, self.owner_id, &self.version)
            .filter(&self.filter)
            .offset(self.offset)
            .count(self.count)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let client = WallClient::from_env();
    let params = args.params();
    debug!(base_url = client.base_url(), "Fetching wall {}", params.owner_id);

    let printed = if args.texts_only {
        let texts = client.fetch_texts(&params, args.min_likes).await;
        print_all(texts, |text| Ok(text.clone()))?
    } else {
        let thresholds = Thresholds::new(args.min_likes, args.min_reposts);
        let posts = client.fetch_posts(&params, thresholds).await;
        print_all(posts, |post| Ok(serde_json::to_string_pretty(post)?))?
    };

    if printed == 0 {
        println!("The request returned nothing.");
    }
    println!("\nALL DONE!");

    Ok(())
}

/// Print every record followed by a blank line and return how many were printed.
///
/// `EmptyResult` counts as zero records, so the caller reports "returned nothing"
/// for it just as for an empty list. Validation, transport and API errors are
/// returned instead, which makes the binary exit non-zero without the
/// "returned nothing" and "ALL DONE!" lines.
fn print_all<T>(
    result: std::result::Result<Vec<T>, WallError>,
    render: impl Fn(&T) -> Result<String>,
) -> Result<usize> {
    let records = match result {
        Ok(records) => records,
        Err(WallError::EmptyResult) => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    for record in &records {
        println!("{}\n", render(record)?);
    }

    Ok(records.len())
}
