//! Build project generation and asset staging

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::BuildConfig;

/// Descriptor used when no host template tree provides one
fn skeleton_descriptor(placeholder: &str) -> String {
    format!(
        r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <OutputType>Exe</OutputType>
    <TargetFramework>net8.0</TargetFramework>
  </PropertyGroup>
  <ItemGroup>
    {placeholder}
  </ItemGroup>
</Project>
"#
    )
}

/// Insert one reference per code location at the placeholder, then drop the
/// placeholder
pub fn render_descriptor(
    descriptor: &str,
    config: &BuildConfig,
    locations: &BTreeSet<String>,
) -> String {
    let references: Vec<String> = locations
        .iter()
        .map(|location| config.reference_template.replace("%code_uri%", location))
        .collect();

    descriptor.replace(&config.placeholder, &references.join("\n"))
}

/// Write the build project descriptor into the output directory
///
/// Starts from the descriptor staged from the host template tree if one was
/// staged this session, otherwise from a minimal project. A descriptor left
/// behind by an earlier session is always regenerated.
pub fn materialize_descriptor(
    config: &BuildConfig,
    output_dir: &Path,
    locations: &BTreeSet<String>,
    staged: bool,
) -> io::Result<PathBuf> {
    let path = config.descriptor_path(output_dir);
    let base = if staged {
        match fs::read_to_string(&path) {
            Ok(text) if text.contains(&config.placeholder) => text,
            Ok(_) => {
                warn!(
                    path = %path.display(),
                    placeholder = %config.placeholder,
                    "Staged build project has no placeholder, using a minimal project"
                );
                skeleton_descriptor(&config.placeholder)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => skeleton_descriptor(&config.placeholder),
            Err(e) => return Err(e),
        }
    } else {
        skeleton_descriptor(&config.placeholder)
    };

    fs::create_dir_all(output_dir)?;
    fs::write(&path, render_descriptor(&base, config, locations))?;
    info!(
        path = %path.display(),
        references = locations.len(),
        "Generated build project"
    );
    Ok(path)
}

/// Recursively copy a directory tree, returning the number of files copied
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    debug!(src = %src.display(), dst = %dst.display(), files = copied, "Copied tree");
    Ok(copied)
}

/// First file called `name` below `root`, skipping hidden directories and
/// the output directory
pub fn find_file(root: &Path, name: &str, skip: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let hidden = e.file_name().to_string_lossy().starts_with('.');
            !(e.file_type().is_dir() && (hidden || e.path() == skip))
        })
        .filter_map(Result::ok)
        .find(|e| e.file_type().is_file() && e.file_name() == name)
        .map(walkdir::DirEntry::into_path)
}

/// Copy the application settings file into the output directory
///
/// Best effort: a missing file or a failed copy is logged and ignored.
pub fn copy_settings(project_root: &Path, output_dir: &Path, name: &str) -> Option<PathBuf> {
    let Some(source) = find_file(project_root, name, output_dir) else {
        debug!(file = %name, "No settings file found");
        return None;
    };

    let destination = output_dir.join(name);
    match fs::create_dir_all(output_dir).and_then(|()| fs::copy(&source, &destination)) {
        Ok(_) => {
            info!(source = %source.display(), "Copied settings file");
            Some(destination)
        }
        Err(e) => {
            warn!(source = %source.display(), error = %e, "Could not copy settings file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locations(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_render_descriptor() {
        let config = BuildConfig::default();
        let rendered = render_descriptor(
            "<ItemGroup>\n<!-- Projects -->\n</ItemGroup>",
            &config,
            &locations(&["src/Orders/Orders", "src/Shared/Shared"]),
        );
        assert_eq!(
            rendered,
            "<ItemGroup>\n\
             <ProjectReference Include=\"../src/Orders/Orders.csproj\" />\n\
             <ProjectReference Include=\"../src/Shared/Shared.csproj\" />\n\
             </ItemGroup>"
        );
    }

    #[test]
    fn test_materialize_uses_staged_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let config = BuildConfig::default();
        fs::write(
            dir.path().join("dotnet.csproj"),
            "<Project><!-- Projects --></Project>",
        )
        .unwrap();

        let path =
            materialize_descriptor(&config, dir.path(), &locations(&["src/A/A"]), true).unwrap();
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "<Project><ProjectReference Include=\"../src/A/A.csproj\" /></Project>"
        );
    }

    #[test]
    fn test_materialize_without_template() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let path =
            materialize_descriptor(&BuildConfig::default(), &out, &locations(&["x/X"]), false)
                .unwrap();

        let text = fs::read_to_string(path).unwrap();
        assert!(text.contains("<ProjectReference Include=\"../x/X.csproj\" />"));
        assert!(!text.contains("<!-- Projects -->"));
    }

    #[test]
    fn test_materialize_replaces_previous_session_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = BuildConfig::default();

        materialize_descriptor(&config, dir.path(), &locations(&["src/A/A"]), false).unwrap();
        let path =
            materialize_descriptor(&config, dir.path(), &locations(&["src/A/A", "src/B/B"]), false)
                .unwrap();

        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text.matches("../src/A/A.csproj").count(), 1);
        assert!(text.contains("<ProjectReference Include=\"../src/B/B.csproj\" />"));
    }

    #[test]
    fn test_staged_descriptor_without_placeholder_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = BuildConfig::default();
        fs::write(
            dir.path().join("dotnet.csproj"),
            "<Project><ProjectReference Include=\"../old/Old.csproj\" /></Project>",
        )
        .unwrap();

        let path =
            materialize_descriptor(&config, dir.path(), &locations(&["src/New/New"]), true).unwrap();
        let text = fs::read_to_string(path).unwrap();
        assert!(!text.contains("old/Old"));
        assert!(text.contains("../src/New/New.csproj"));
    }

    #[test]
    fn test_copy_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("host");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("Program.cs"), "class P {}").unwrap();
        fs::write(src.join("nested/util.cs"), "class U {}").unwrap();

        let dst = dir.path().join("out");
        assert_eq!(copy_tree(&src, &dst).unwrap(), 2);
        assert!(dst.join("nested/util.cs").is_file());
    }

    #[test]
    fn test_copy_settings_skips_output_and_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let out = root.join(".samp-out");
        fs::create_dir_all(&out).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("src/Api")).unwrap();
        fs::write(root.join(".git/appsettings.json"), "{\"hidden\": true}").unwrap();
        fs::write(root.join("src/Api/appsettings.json"), "{\"real\": true}").unwrap();

        let copied = copy_settings(root, &out, "appsettings.json").unwrap();
        assert_eq!(fs::read_to_string(copied).unwrap(), "{\"real\": true}");
    }

    #[test]
    fn test_copy_settings_missing_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            copy_settings(dir.path(), &dir.path().join("out"), "appsettings.json"),
            None
        );
    }
}
