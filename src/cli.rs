use crate::commands::{self, NewComment, Settings};
use anyhow::{Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::fs;
use std::io;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "promoter", version)]
#[command(
    about = "Promote option-proposal comments into proposal voting options",
    long_about = "promoter stores proposals and comments in a local document store and runs the comment-created trigger: comments flagged as option proposals become voting options on their proposal, exactly once per comment, no matter how often the trigger is redelivered."
)]
#[command(arg_required_else_help = true)]
#[command(after_long_help = "Examples:
  promoter proposal create --id p1 --title \"Budget 2027\"
  promoter comment add --proposal p1 --content \"Adopt policy A\" --author-uid u1 --option
  promoter deliver --proposal p1 --comment c1 --payload c1.json
  promoter replay --proposal p1 --workers 4
  promoter inspect --proposal p1
  promoter completion zsh > ~/.zsh/completions/_promoter")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Path to store DB (default: $XDG_STATE_HOME/promoter/store.db)"
    )]
    state_db: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Append one NDJSON line per invocation outcome to this file"
    )]
    log: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        help = "Per-invocation timeout in seconds"
    )]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Manage proposals")]
    #[command(subcommand)]
    Proposal(ProposalCommands),
    #[command(about = "Manage comments")]
    #[command(subcommand)]
    Comment(CommentCommands),
    #[command(
        about = "Deliver a comment-created trigger event",
        long_about = "Deliver (or redeliver) a comment-created trigger event with a raw JSON comment payload. Exits non-zero when the invocation hit a transient fault and should be redelivered."
    )]
    #[command(arg_required_else_help = true)]
    #[command(after_long_help = "Examples:
  promoter deliver --proposal p1 --comment c1 --payload c1.json
  echo '{\"isOptionProposal\":true,\"content\":\"A\",\"author\":{\"uid\":\"u1\"}}' | promoter deliver --proposal p1 --comment c1 --payload -")]
    Deliver {
        #[arg(long, value_name = "PROPOSAL_ID", help = "Parent proposal ID")]
        proposal: String,
        #[arg(long, value_name = "COMMENT_ID", help = "Created comment ID")]
        comment: String,
        #[arg(long, value_name = "FILE", help = "Comment JSON payload (`-` for stdin)")]
        payload: PathBuf,
    },
    #[command(about = "Replay stored comments that never reached a terminal status")]
    #[command(arg_required_else_help = true)]
    Replay {
        #[arg(long, value_name = "PROPOSAL_ID", help = "Proposal to replay")]
        proposal: String,
        #[arg(long, value_name = "N", help = "Parallel workers (default from config)")]
        workers: Option<usize>,
    },
    #[command(about = "Record one vote for an option")]
    #[command(arg_required_else_help = true)]
    Vote {
        #[arg(long, value_name = "PROPOSAL_ID", help = "Proposal that owns the option")]
        proposal: String,
        #[arg(long, value_name = "OPTION_ID", help = "Option to vote for")]
        option: String,
    },
    #[command(about = "Inspect options, comment statuses and invocations of a proposal")]
    #[command(arg_required_else_help = true)]
    Inspect {
        #[arg(long, value_name = "PROPOSAL_ID", help = "Proposal to inspect")]
        proposal: String,
    },
    #[command(
        about = "Generate shell completion script",
        long_about = "Generate shell completion script for your shell. Redirect output to your shell completion directory."
    )]
    #[command(arg_required_else_help = true)]
    Completion {
        #[arg(value_enum, value_name = "SHELL", help = "Target shell")]
        shell: Shell,
    },
    #[command(about = "Generate a man page")]
    Man {
        #[arg(
            long,
            value_name = "PATH",
            help = "Write man page to file (stdout when omitted)"
        )]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ProposalCommands {
    #[command(about = "Create a proposal")]
    Create {
        #[arg(long, value_name = "ID", help = "Proposal ID (random when omitted)")]
        id: Option<String>,
        #[arg(long, value_name = "TEXT", help = "Proposal title")]
        title: String,
    },
}

#[derive(Subcommand, Debug)]
enum CommentCommands {
    #[command(
        about = "Add a comment and fire the create trigger",
        long_about = "Store a new comment under a proposal, then run the comment-created trigger for it once."
    )]
    Add {
        #[arg(long, value_name = "PROPOSAL_ID", help = "Parent proposal ID")]
        proposal: String,
        #[arg(long, value_name = "ID", help = "Comment ID (random when omitted)")]
        id: Option<String>,
        #[arg(long, value_name = "TEXT", help = "Comment body")]
        content: String,
        #[arg(long, value_name = "UID", help = "Author user ID")]
        author_uid: String,
        #[arg(long, value_name = "NAME", help = "Author display name")]
        author_name: Option<String>,
        #[arg(long, help = "Propose this comment as a voting option")]
        option: bool,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = || -> Result<Settings> {
        Settings::resolve(
            &std::env::current_dir()?,
            cli.global.state_db.clone(),
            cli.global.log.clone(),
            cli.global.timeout_secs,
        )
    };

    match cli.command {
        Commands::Proposal(ProposalCommands::Create { ref id, ref title }) => {
            let id = commands::create_proposal(&settings()?, id.clone(), title)?;
            println!("{id}");
            Ok(())
        }
        Commands::Comment(CommentCommands::Add {
            ref proposal,
            ref id,
            ref content,
            ref author_uid,
            ref author_name,
            option,
        }) => {
            let report = commands::add_comment(
                &settings()?,
                NewComment {
                    proposal_id: proposal.clone(),
                    id: id.clone(),
                    content: content.clone(),
                    author_uid: author_uid.clone(),
                    author_name: author_name.clone(),
                    option_proposal: option,
                },
            )?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.needs_redelivery() {
                bail!("comment stored but its trigger must be replayed: promoter replay --proposal {proposal}");
            }
            Ok(())
        }
        Commands::Deliver {
            ref proposal,
            ref comment,
            ref payload,
        } => {
            let report = commands::deliver(&settings()?, proposal, comment, payload)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Replay {
            ref proposal,
            workers,
        } => {
            let reports = commands::replay(&settings()?, proposal, workers)?;
            if reports.is_empty() {
                println!("No unprocessed comments for proposal {proposal}");
                return Ok(());
            }
            for report in &reports {
                println!("{}", serde_json::to_string(report)?);
            }
            let retry = reports.iter().filter(|r| r.needs_redelivery()).count();
            if retry > 0 {
                bail!("{retry} comment(s) hit transient failures; run replay again");
            }
            Ok(())
        }
        Commands::Vote {
            ref proposal,
            ref option,
        } => {
            let votes = commands::vote(&settings()?, proposal, option)?;
            println!("{option}: {votes} vote(s)");
            Ok(())
        }
        Commands::Inspect { ref proposal } => {
            let view = commands::inspect(&settings()?, proposal)?;
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        Commands::Man { ref output } => {
            let man = clap_mangen::Man::new(Cli::command());
            match output {
                Some(path) => {
                    let mut bytes = Vec::new();
                    man.render(&mut bytes)?;
                    fs::write(path, bytes)?;
                }
                None => {
                    man.render(&mut io::stdout())?;
                }
            }
            Ok(())
        }
    }
}
