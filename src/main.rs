#[macro_use]
extern crate tracing;

use clap::Parser;
use eyre::Result;
use khcheck_runner::{
    client::KubeClusterClient,
    context::Context,
    pod_spec,
    resources::{
        self,
        DEFAULT_NAMESPACE,
    },
    whitelist,
};
use kube::CustomResourceExt as _;
use std::{
    path::PathBuf,
    sync::Arc,
    time::Duration,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
enum Args {
    /// Print the KuberhealthyCheck CRD
    Crds,
    /// Launch one run of a check
    RunOnce(ArgsRunOnce),
    /// Print the run UUID currently whitelisted for a check
    Whitelist(ArgsWhitelist),
}

#[derive(Parser)]
struct ArgsRunOnce {
    #[clap(long, help = "Path to a KuberhealthyCheck manifest (YAML or JSON)")]
    check_file: PathBuf,

    #[clap(long, env = "POD_NAMESPACE", help = "Namespace of the check, overrides the manifest")]
    namespace: Option<String>,

    #[clap(long, help = "Name of the checker pod. Defaults to the check name")]
    pod_name: Option<String>,

    #[clap(
        long,
        env = "KH_REPORTING_URL",
        help = "Where checker pods send their reports",
        default_value = pod_spec::DEFAULT_REPORTING_URL
    )]
    reporting_url: String,

    #[clap(
        long,
        help = "Give up on the run after this long",
        default_value = "5m",
        value_parser = humantime::parse_duration
    )]
    deadline: Duration,

    #[clap(long, env = "KH_DEBUG", help = "Verbose logging")]
    debug: bool,
}

#[derive(Parser)]
struct ArgsWhitelist {
    #[clap(long, env = "POD_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Name of the check
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install().expect("color_eyre init");

    let args = Args::parse();

    let default_level = match &args {
        Args::RunOnce(ArgsRunOnce { debug: true, .. }) => "debug",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    match args {
        Args::Crds => {
            let yaml = serde_yaml::to_string(&resources::KuberhealthyCheck::crd()).expect("Failed to serialize CRD");
            print!("{yaml}")
        }
        Args::RunOnce(args) => {
            run_once(args).await?;
        }
        Args::Whitelist(ArgsWhitelist { namespace, name }) => {
            let client = KubeClusterClient::new(kube::Client::try_default().await?);
            let uuid = whitelist::get_whitelisted_uuid_for_external_check(&client, &namespace, &name).await?;
            println!("{uuid}");
        }
    }

    Ok(())
}

async fn run_once(
    ArgsRunOnce {
        check_file,
        namespace,
        pod_name,
        reporting_url,
        deadline,
        debug,
    }: ArgsRunOnce,
) -> Result<()> {
    let mut check = pod_spec::load_check_file(&check_file)?;
    if let Some(namespace) = namespace {
        check.metadata.namespace = Some(namespace);
    }

    let client = kube::Client::try_default().await?;
    let mut ctx = Context::new(Arc::new(KubeClusterClient::new(client)));
    ctx.run_deadline = deadline;

    let mut checker = ctx.checker(&check);
    checker.reporting_url = reporting_url;
    checker.debug = debug;
    if let Some(pod_name) = pod_name {
        checker.pod_name = pod_name;
    }

    info!(namespace = %checker.namespace, check = %checker.name(), "Starting check run");

    if let Err(err) = ctx.run_check(&mut checker).await {
        if err.is_config_error() {
            error!("Check definition needs fixing: {err}");
        } else {
            warn!("Check run failed, the next scheduled run may succeed: {err}");
        }
        return Err(err.into());
    }

    info!(uuid = %checker.current_uuid(), "Check run submitted");

    Ok(())
}
