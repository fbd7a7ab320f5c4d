//! # Typed Path Containers
//!
//! Batch descriptions carry their input and output files in a small closed
//! set of container shapes. Modeling the shapes as an enum keeps the
//! relocation logic (relative on disk, absolute in memory) to one recursive
//! rewrite function and moves shape validation to construction time instead
//! of scattering container checks across the planner.
//!
//! The serde representation is untagged, so batch files stay plain JSON
//! containers: a string, a list of strings, a list of lists, or an object
//! whose values are strings or lists.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A container of file paths as it appears under `"inputs"` or `"outputs"`
/// in a batch description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSet {
    /// A single path.
    Single(PathBuf),
    /// A flat list of paths.
    Many(Vec<PathBuf>),
    /// A list of path lists, one sub-list per logical group.
    Nested(Vec<Vec<PathBuf>>),
    /// Named sub-containers. Values are restricted to `Single` or `Many`.
    Grouped(IndexMap<String, PathSet>),
}

impl PathSet {
    /// Apply `f` to every path in the container, producing a new container
    /// of the same shape. This is the one rewrite function used both for
    /// making paths relative to the workflow root and for making them
    /// absolute again.
    pub fn rewrite<F>(&self, f: &F) -> Result<PathSet>
    where
        F: Fn(&Path) -> Result<PathBuf>,
    {
        Ok(match self {
            PathSet::Single(p) => PathSet::Single(f(p)?),
            PathSet::Many(paths) => {
                PathSet::Many(paths.iter().map(|p| f(p)).collect::<Result<_>>()?)
            }
            PathSet::Nested(groups) => PathSet::Nested(
                groups
                    .iter()
                    .map(|group| group.iter().map(|p| f(p)).collect::<Result<_>>())
                    .collect::<Result<_>>()?,
            ),
            PathSet::Grouped(map) => {
                let mut rewritten = IndexMap::with_capacity(map.len());
                for (name, value) in map {
                    rewritten.insert(name.clone(), value.rewrite(f)?);
                }
                PathSet::Grouped(rewritten)
            }
        })
    }

    /// Collect every path in the container into `out`, in container order.
    pub fn flatten_into(&self, out: &mut Vec<PathBuf>) {
        match self {
            PathSet::Single(p) => out.push(p.clone()),
            PathSet::Many(paths) => out.extend(paths.iter().cloned()),
            PathSet::Nested(groups) => {
                for group in groups {
                    out.extend(group.iter().cloned());
                }
            }
            PathSet::Grouped(map) => {
                for value in map.values() {
                    value.flatten_into(out);
                }
            }
        }
    }

    /// All paths in the container as one flat list.
    pub fn flatten(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    /// Validate the shape of an input container: any variant is allowed,
    /// but grouped values must themselves be a single path or a flat list.
    pub fn validate_input(&self, name: &str) -> Result<()> {
        if let PathSet::Grouped(map) = self {
            for (key, value) in map {
                match value {
                    PathSet::Single(_) | PathSet::Many(_) => {}
                    _ => {
                        return Err(Error::JobDescription(format!(
                            "input \"{name}\": grouped value \"{key}\" must be a path or a list of paths"
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Validate the shape of an output container: outputs must be
    /// list-shaped so that every produced file is individually addressable.
    pub fn validate_output(&self, name: &str) -> Result<()> {
        match self {
            PathSet::Many(_) | PathSet::Nested(_) => Ok(()),
            _ => Err(Error::JobDescription(format!(
                "output \"{name}\" must be a list of paths"
            ))),
        }
    }
}

/// Rewrite `path` relative to `root`. Fails when `path` does not live under
/// the workflow root, since such a file could not be relocated.
pub fn relativize(path: &Path, root: &Path) -> Result<PathBuf> {
    path.strip_prefix(root).map(Path::to_path_buf).map_err(|_| {
        Error::Validation(format!(
            "path {} is not below the workflow root {}",
            path.display(),
            root.display()
        ))
    })
}

/// Rewrite a workflow-root-relative `path` to an absolute one.
pub fn absolutize(path: &Path, root: &Path) -> PathBuf {
    root.join(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grouped(entries: Vec<(&str, PathSet)>) -> PathSet {
        PathSet::Grouped(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }

    #[test]
    fn test_rewrite_preserves_shape() {
        let set = grouped(vec![
            ("dapi", PathSet::Many(vec![PathBuf::from("a.png"), PathBuf::from("b.png")])),
            ("gfp", PathSet::Single(PathBuf::from("c.png"))),
        ]);
        let root = Path::new("/data/exp_1");
        let absolute = set.rewrite(&|p| Ok(absolutize(p, root))).unwrap();
        match &absolute {
            PathSet::Grouped(map) => {
                assert_eq!(
                    map["dapi"],
                    PathSet::Many(vec![
                        PathBuf::from("/data/exp_1/a.png"),
                        PathBuf::from("/data/exp_1/b.png"),
                    ])
                );
                assert_eq!(map["gfp"], PathSet::Single(PathBuf::from("/data/exp_1/c.png")));
            }
            other => panic!("shape changed: {other:?}"),
        }
    }

    #[test]
    fn test_relativize_then_absolutize_round_trips() {
        let root = Path::new("/data/exp_1");
        let set = PathSet::Nested(vec![
            vec![PathBuf::from("/data/exp_1/align/site_01.png")],
            vec![PathBuf::from("/data/exp_1/align/site_02.png")],
        ]);
        let relative = set.rewrite(&|p| relativize(p, root)).unwrap();
        let absolute = relative.rewrite(&|p| Ok(absolutize(p, root))).unwrap();
        assert_eq!(absolute, set);
    }

    #[test]
    fn test_relativize_rejects_foreign_path() {
        let root = Path::new("/data/exp_1");
        assert!(relativize(Path::new("/tmp/out.png"), root).is_err());
    }

    #[test]
    fn test_flatten_covers_all_variants() {
        let set = grouped(vec![
            ("a", PathSet::Single(PathBuf::from("x"))),
            ("b", PathSet::Many(vec![PathBuf::from("y"), PathBuf::from("z")])),
        ]);
        assert_eq!(
            set.flatten(),
            vec![PathBuf::from("x"), PathBuf::from("y"), PathBuf::from("z")]
        );
        let empty = PathSet::Many(vec![]);
        assert!(empty.flatten().is_empty());
    }

    #[test]
    fn test_output_must_be_list_shaped() {
        assert!(PathSet::Single(PathBuf::from("x")).validate_output("stats").is_err());
        assert!(PathSet::Many(vec![]).validate_output("stats").is_ok());
        assert!(PathSet::Nested(vec![vec![]]).validate_output("stats").is_ok());
    }

    #[test]
    fn test_grouped_input_values_must_stay_flat() {
        let nested_group = grouped(vec![("inner", grouped(vec![]))]);
        assert!(nested_group.validate_input("images").is_err());
        let flat_group = grouped(vec![("inner", PathSet::Many(vec![]))]);
        assert!(flat_group.validate_input("images").is_ok());
    }

    #[test]
    fn test_untagged_serde_representation() {
        let set = grouped(vec![(
            "sites",
            PathSet::Many(vec![PathBuf::from("s1.png")]),
        )]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"sites":["s1.png"]}"#);
        let back: PathSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);

        let nested: PathSet = serde_json::from_str(r#"[["a"],["b","c"]]"#).unwrap();
        assert_eq!(
            nested,
            PathSet::Nested(vec![
                vec![PathBuf::from("a")],
                vec![PathBuf::from("b"), PathBuf::from("c")],
            ])
        );
    }
}
