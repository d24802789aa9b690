use clap::Parser;
use std::path::PathBuf;
use stratus::cli::{Cli, Commands, ConfigCommands};

#[test]
fn test_parse_config_validate_with_file() {
    let cli = Cli::try_parse_from(["stratus", "config", "validate", "--file", "prod.yaml"]).unwrap();

    match cli.command {
        Commands::Config(ConfigCommands::Validate { file }) => {
            assert_eq!(file, Some(PathBuf::from("prod.yaml")));
        }
        _ => panic!("Wrong command"),
    }
    assert!(!cli.json);
}

#[test]
fn test_parse_global_json_flag() {
    let cli = Cli::try_parse_from(["stratus", "cluster-id", "--json"]).unwrap();
    assert!(cli.json);
    assert!(matches!(cli.command, Commands::ClusterId(ref args) if args.file.is_none()));
}

#[test]
fn test_parse_config_show() {
    let cli = Cli::try_parse_from(["stratus", "--json", "config", "show"]).unwrap();
    assert!(matches!(
        cli.command,
        Commands::Config(ConfigCommands::Show { file: None })
    ));
}

#[test]
fn test_unknown_command_is_rejected() {
    assert!(Cli::try_parse_from(["stratus", "deploy"]).is_err());
}
