use std::env;
use std::fs;
use std::io;
use std::path::Path;

fn main() -> io::Result<()> {
    println!("cargo:rerun-if-changed=src/rules/");

    let manifest_dir = env::var("CARGO_MANIFEST_DIR").map_err(io::Error::other)?;
    let rules_dir = Path::new(&manifest_dir).join("src").join("rules");

    // Each rule lives in its own directory with a mod.rs.
    let mut modules = Vec::new();
    for entry in fs::read_dir(&rules_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && entry.path().join("mod.rs").is_file() {
            modules.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    modules.sort();

    let content: String = modules
        .iter()
        .map(|module| {
            let rule_path = rules_dir.join(module).join("mod.rs");
            format!("#[path = {rule_path:?}]\npub(crate) mod {module};\n")
        })
        .collect();

    let out_dir = env::var("OUT_DIR").map_err(io::Error::other)?;
    fs::write(Path::new(&out_dir).join("rule_modules.rs"), content)
}
