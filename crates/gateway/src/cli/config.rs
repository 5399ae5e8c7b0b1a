use aiop_domain::{Config, ConfigSeverity};

/// Prints the resolved configuration. `DATABASE_URL` is reported present/absent,
/// never echoed in full, since it typically carries credentials.
pub fn show(config: &Config) {
    println!("database_url:        {}", if config.database_url.is_some() { "<set>" } else { "<unset>" });
    println!("ollama_url:          {}", config.ollama_url);
    println!("embed_model:         {}", config.embed_model);
    println!("chat_model:          {}", config.chat_model);
    println!("expected_embed_dim:  {}", config.expected_embed_dim);
    println!("top_k:               {}", config.top_k);
    println!("min_similarity:      {}", config.min_similarity);
    println!("include_tools:       {}", config.include_tools);
    println!("worker_poll_s:       {}", config.worker_poll_s);
    println!("worker_lock_s:       {}", config.worker_lock_s);
    println!("log_level:           {}", config.log_level);
    println!("host:                {}", config.host);
    println!("port:                {}", config.port);
}

/// Runs `Config::validate` and prints each issue. Returns `true` when no
/// `Error`-severity issue was found.
pub fn validate(config: &Config) -> bool {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => println!("warning: {issue}"),
            ConfigSeverity::Error => println!("error:   {issue}"),
        }
    }
    let ok = issues.iter().all(|i| i.severity != ConfigSeverity::Error);
    if ok {
        println!("configuration OK");
    }
    ok
}
