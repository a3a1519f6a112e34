//! Collection queries against the GraphQL v2 API.

use super::{map_status, NexusClient};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Collection metadata plus its latest published revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub slug: String,
    pub name: String,
    pub summary: Option<String>,
    pub game_domain: String,
    pub latest_revision: Option<RevisionDetails>,
}

/// One entry of a collection's revision history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub revision_number: u32,
    pub created_at: Option<String>,
    pub total_size: Option<i64>,
    pub mod_count: Option<i64>,
}

/// Exactly what can be downloaded for one revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionDetails {
    pub revision_number: u32,
    pub mod_files: Vec<ModFileRef>,
}

/// A single downloadable archive within a collection revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModFileRef {
    pub game_domain: String,
    pub mod_id: i64,
    pub file_id: i64,
    pub name: String,
    pub version: Option<String>,
    pub size_bytes: i64,
    pub optional: bool,
}

#[derive(Serialize)]
struct GraphQlRequest<V> {
    query: String,
    variables: V,
}

#[derive(Deserialize)]
struct GraphQlResponse<R> {
    data: Option<R>,
    errors: Option<Vec<GraphQlErrorEntry>>,
}

#[derive(Deserialize)]
struct GraphQlErrorEntry {
    message: String,
}

// Wire shape of a revision's mod-file list, shared by the collection and
// revision queries.
#[derive(Deserialize)]
struct RevisionNode {
    #[serde(rename = "revisionNumber")]
    revision_number: u32,
    #[serde(rename = "modFiles", default)]
    mod_files: Vec<ModFileNode>,
}

#[derive(Deserialize)]
struct ModFileNode {
    #[serde(default)]
    optional: bool,
    file: Option<FileNode>,
}

#[derive(Deserialize)]
struct FileNode {
    #[serde(rename = "fileId")]
    file_id: i64,
    name: String,
    version: Option<String>,
    #[serde(rename = "sizeInBytes")]
    size_in_bytes: Option<String>,
    #[serde(rename = "mod")]
    mod_info: ModNode,
}

#[derive(Deserialize)]
struct ModNode {
    #[serde(rename = "modId")]
    mod_id: i64,
    game: GameNode,
}

#[derive(Deserialize)]
struct GameNode {
    #[serde(rename = "domainName")]
    domain_name: String,
}

fn convert_revision(node: RevisionNode) -> RevisionDetails {
    let mod_files = node
        .mod_files
        .into_iter()
        .filter_map(|entry| {
            let file = entry.file?;
            Some(ModFileRef {
                game_domain: file.mod_info.game.domain_name,
                mod_id: file.mod_info.mod_id,
                file_id: file.file_id,
                name: file.name,
                version: file.version,
                size_bytes: file
                    .size_in_bytes
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default(),
                optional: entry.optional,
            })
        })
        .collect();

    RevisionDetails {
        revision_number: node.revision_number,
        mod_files,
    }
}

impl NexusClient {
    /// Execute one GraphQL query with pacing, retry, and cancellation.
    pub(crate) async fn graphql<V, R>(
        &self,
        query: &str,
        variables: V,
        cancel: &CancelToken,
    ) -> Result<R>
    where
        V: Serialize,
        R: DeserializeOwned,
    {
        let request = GraphQlRequest {
            query: query.to_string(),
            variables,
        };

        self.retry()
            .run(cancel, || async {
                let response = self
                    .send(self.http().post(self.graphql_endpoint()).json(&request), cancel)
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    return Err(map_status(status.as_u16(), "graphql"));
                }

                let text = response.text().await?;
                let parsed: GraphQlResponse<R> = serde_json::from_str(&text)
                    .map_err(|e| Error::GraphQl(format!("malformed response: {}", e)))?;

                if let Some(errors) = parsed.errors {
                    if !errors.is_empty() {
                        let messages: Vec<String> =
                            errors.into_iter().map(|e| e.message).collect();
                        return Err(Error::GraphQl(messages.join(", ")));
                    }
                }

                parsed
                    .data
                    .ok_or_else(|| Error::GraphQl("response contained no data".to_string()))
            })
            .await
    }

    /// Collection metadata plus the latest published revision's mod files.
    pub async fn get_collection(&self, slug: &str, cancel: &CancelToken) -> Result<Collection> {
        let query = r#"
            query Collection($slug: String!) {
                collection(slug: $slug, viewAdultContent: true) {
                    slug
                    name
                    summary
                    game {
                        domainName
                    }
                    latestPublishedRevision {
                        revisionNumber
                        modFiles {
                            optional
                            file {
                                fileId
                                name
                                version
                                sizeInBytes
                                mod {
                                    modId
                                    game {
                                        domainName
                                    }
                                }
                            }
                        }
                    }
                }
            }
        "#;

        #[derive(Serialize)]
        struct Variables<'a> {
            slug: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            collection: Option<CollectionNode>,
        }

        #[derive(Deserialize)]
        struct CollectionNode {
            slug: String,
            name: String,
            summary: Option<String>,
            game: GameNode,
            #[serde(rename = "latestPublishedRevision")]
            latest_published_revision: Option<RevisionNode>,
        }

        let response: Response = self.graphql(query, Variables { slug }, cancel).await?;
        let node = response
            .collection
            .ok_or_else(|| Error::NotFound(format!("collection {}", slug)))?;

        Ok(Collection {
            slug: node.slug,
            name: node.name,
            summary: node.summary,
            game_domain: node.game.domain_name,
            latest_revision: node.latest_published_revision.map(convert_revision),
        })
    }

    /// Revision history of a collection.
    pub async fn get_revisions(&self, slug: &str, cancel: &CancelToken) -> Result<Vec<Revision>> {
        let query = r#"
            query CollectionRevisions($slug: String!) {
                collection(slug: $slug, viewAdultContent: true) {
                    revisions {
                        revisionNumber
                        createdAt
                        totalSize
                        modCount
                    }
                }
            }
        "#;

        #[derive(Serialize)]
        struct Variables<'a> {
            slug: &'a str,
        }

        #[derive(Deserialize)]
        struct Response {
            collection: Option<CollectionNode>,
        }

        #[derive(Deserialize)]
        struct CollectionNode {
            #[serde(default)]
            revisions: Vec<RevisionEntry>,
        }

        #[derive(Deserialize)]
        struct RevisionEntry {
            #[serde(rename = "revisionNumber")]
            revision_number: u32,
            #[serde(rename = "createdAt")]
            created_at: Option<String>,
            #[serde(rename = "totalSize")]
            total_size: Option<String>,
            #[serde(rename = "modCount")]
            mod_count: Option<i64>,
        }

        let response: Response = self.graphql(query, Variables { slug }, cancel).await?;
        let node = response
            .collection
            .ok_or_else(|| Error::NotFound(format!("collection {}", slug)))?;

        Ok(node
            .revisions
            .into_iter()
            .map(|r| Revision {
                revision_number: r.revision_number,
                created_at: r.created_at,
                total_size: r.total_size.and_then(|s| s.parse().ok()),
                mod_count: r.mod_count,
            })
            .collect())
    }

    /// The downloadable mod files of one specific revision.
    pub async fn get_revision_mods(
        &self,
        slug: &str,
        revision: u32,
        cancel: &CancelToken,
    ) -> Result<RevisionDetails> {
        let query = r#"
            query CollectionRevisionMods($slug: String!, $revision: Int!) {
                collectionRevision(slug: $slug, revision: $revision, viewAdultContent: true) {
                    revisionNumber
                    modFiles {
                        optional
                        file {
                            fileId
                            name
                            version
                            sizeInBytes
                            mod {
                                modId
                                game {
                                    domainName
                                }
                            }
                        }
                    }
                }
            }
        "#;

        #[derive(Serialize)]
        struct Variables<'a> {
            slug: &'a str,
            revision: u32,
        }

        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "collectionRevision")]
            collection_revision: Option<RevisionNode>,
        }

        let response: Response = self
            .graphql(query, Variables { slug, revision }, cancel)
            .await?;
        let node = response
            .collection_revision
            .ok_or_else(|| Error::NotFound(format!("collection {} revision {}", slug, revision)))?;

        Ok(convert_revision(node))
    }

    /// True iff the credential resolves to a user.
    pub async fn validate_credential(&self, cancel: &CancelToken) -> Result<bool> {
        let query = r#"
            query ValidateCredential {
                currentUser {
                    name
                }
            }
        "#;

        #[derive(Serialize)]
        struct Variables {}

        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "currentUser")]
            current_user: Option<serde_json::Value>,
        }

        match self.graphql::<_, Response>(query, Variables {}, cancel).await {
            Ok(response) => Ok(response.current_user.is_some()),
            Err(Error::Unauthorized) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_revision_skips_files_without_payload() {
        let node = RevisionNode {
            revision_number: 4,
            mod_files: vec![
                ModFileNode {
                    optional: false,
                    file: Some(FileNode {
                        file_id: 10,
                        name: "Main Mod".into(),
                        version: Some("1.2".into()),
                        size_in_bytes: Some("2048".into()),
                        mod_info: ModNode {
                            mod_id: 7,
                            game: GameNode {
                                domain_name: "skyrimspecialedition".into(),
                            },
                        },
                    }),
                },
                ModFileNode {
                    optional: true,
                    file: None,
                },
            ],
        };

        let details = convert_revision(node);
        assert_eq!(details.revision_number, 4);
        assert_eq!(details.mod_files.len(), 1);

        let file = &details.mod_files[0];
        assert_eq!(file.mod_id, 7);
        assert_eq!(file.file_id, 10);
        assert_eq!(file.size_bytes, 2048);
        assert_eq!(file.game_domain, "skyrimspecialedition");
        assert!(!file.optional);
    }

    #[test]
    fn test_malformed_size_defaults_to_zero() {
        let node = RevisionNode {
            revision_number: 1,
            mod_files: vec![ModFileNode {
                optional: false,
                file: Some(FileNode {
                    file_id: 1,
                    name: "X".into(),
                    version: None,
                    size_in_bytes: Some("not-a-number".into()),
                    mod_info: ModNode {
                        mod_id: 1,
                        game: GameNode {
                            domain_name: "skyrim".into(),
                        },
                    },
                }),
            }],
        };

        assert_eq!(convert_revision(node).mod_files[0].size_bytes, 0);
    }
}
