// projeto: seqforecast
// file: src/main.rs
// Linha de comando: carrega os splits, gera sequências, monta o modelo e treina

use chrono::Utc;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::time::Instant;

use seqforecast::config::{DEFAULT_CONFIG_PATH, RunConfig};
use seqforecast::pipeline::{self, ScalerKind};
use seqforecast::TrainingError;

#[derive(Parser, Debug)]
#[command(
    name = "seqforecast",
    version = "0.1.0",
    about = "Treinamento de modelos sequenciais (CNN-LSTM) sobre séries temporais pré-divididas",
    long_about = "Lê X_train / X_test / y_train / y_test de um diretório CSV, normaliza, gera janelas deslizantes, monta o modelo a partir do template do arquivo de configuração e treina com validação por época."
)]
struct Cli {
    /// Arquivo de configuração TOML (criado com os valores padrão se não existir)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Diretório com os arquivos CSV
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Número de épocas de treinamento
    #[arg(long)]
    epochs: Option<usize>,

    /// Tamanho do lote para treinamento
    #[arg(long)]
    batch_size: Option<usize>,

    /// Comprimento da janela (deve ser n_seq * n_steps)
    #[arg(long)]
    sequence_length: Option<usize>,

    /// Subsequências por janela
    #[arg(long)]
    n_seq: Option<usize>,

    /// Passos por subsequência
    #[arg(long)]
    n_steps: Option<usize>,

    /// Estratégia de normalização
    #[arg(long, value_enum)]
    scaler: Option<ScalerArg>,

    /// Não gerar o gráfico de perda
    #[arg(long)]
    no_chart: bool,

    /// Salvar o histórico (.json ou .csv)
    #[arg(long)]
    history_out: Option<PathBuf>,

    /// Semente para inicialização e embaralhamento
    #[arg(long)]
    seed: Option<u64>,

    /// Modo verboso de logging
    #[arg(long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ScalerArg {
    Standard,
    MinMax,
    Robust,
}

impl From<ScalerArg> for ScalerKind {
    fn from(arg: ScalerArg) -> Self {
        match arg {
            ScalerArg::Standard => ScalerKind::Standard,
            ScalerArg::MinMax => ScalerKind::MinMax,
            ScalerArg::Robust => ScalerKind::Robust,
        }
    }
}

fn apply_overrides(config: &mut RunConfig, cli: &Cli) {
    if let Some(dir) = &cli.data_dir {
        config.data.dir = dir.clone();
    }
    if let Some(epochs) = cli.epochs {
        config.training.epochs = epochs;
    }
    if let Some(batch_size) = cli.batch_size {
        config.training.batch_size = batch_size;
    }
    if let Some(length) = cli.sequence_length {
        config.data.sequence_length = length;
    }
    if let Some(n_seq) = cli.n_seq {
        config.training.n_seq = n_seq;
    }
    if let Some(n_steps) = cli.n_steps {
        config.training.n_steps = n_steps;
    }
    if let Some(scaler) = cli.scaler.clone() {
        config.data.scaler = scaler.into();
    }
    if cli.no_chart {
        config.training.render_chart = false;
    }
    if let Some(path) = &cli.history_out {
        config.training.history_path = Some(path.clone());
    }
    if cli.seed.is_some() {
        config.training.seed = cli.seed;
    }
}

fn main() -> Result<(), TrainingError> {
    let cli = Cli::parse();

    // Configurar logging
    setup_logging(cli.verbose);

    let start_time = Instant::now();
    info!("🚀 seqforecast iniciado");
    info!("🕐 Iniciado em: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));

    let mut config = RunConfig::load(&cli.config)?;
    apply_overrides(&mut config, &cli);
    info!(
        "📊 Dados: {} | Janela: {} ({} x {}) | Épocas: {} | Batch: {} | Scaler: {}",
        config.data.dir.display(),
        config.data.sequence_length,
        config.training.n_seq,
        config.training.n_steps,
        config.training.epochs,
        config.training.batch_size,
        config.data.scaler
    );

    match pipeline::run(&config) {
        Ok(report) => {
            info!("✅ Treinamento concluído em {:.2}s", start_time.elapsed().as_secs_f64());
            info!("   ├── Tabelas: {:?}", report.status.keys().collect::<Vec<_>>());
            info!("   ├── Parâmetros: {}", report.parameters);
            if let Some(best) = report.history.best_epoch() {
                info!("   ├── Melhor época: {} (loss = {:.6})", best.epoch, best.val_loss.unwrap_or(best.loss));
            }
            if let Some(val_loss) = &report.val_loss {
                info!("   ├── val_loss por época: {:?}", val_loss);
            }
            info!("   └── Finalizado em: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));
        }
        Err(e) => {
            error!("❌ Erro durante treinamento: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}

// cargo run --release -- --data-dir dados/acoes --epochs 20 --verbose
// cargo run --release -- --config seqforecast.toml --scaler robust --history-out historico.csv
