use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    pub mime_type: String,
    pub file_uri: String,
}

/// One unit of conversational input submitted to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    Text {
        role: TurnRole,
        text: String,
    },
    File {
        role: TurnRole,
        file: FileData,
    },
    Mixed {
        role: TurnRole,
        text: String,
        file: FileData,
    },
}

impl Turn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Turn::Text {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Turn::Text {
            role: TurnRole::Model,
            text: text.into(),
        }
    }

    pub fn user_file(file: FileData) -> Self {
        Turn::File {
            role: TurnRole::User,
            file,
        }
    }

    pub fn role(&self) -> TurnRole {
        match self {
            Turn::Text { role, .. } | Turn::File { role, .. } | Turn::Mixed { role, .. } => *role,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Turn::Text { text, .. } | Turn::Mixed { text, .. } => Some(text),
            Turn::File { .. } => None,
        }
    }

    pub fn file(&self) -> Option<&FileData> {
        match self {
            Turn::File { file, .. } | Turn::Mixed { file, .. } => Some(file),
            Turn::Text { .. } => None,
        }
    }

    pub fn to_content(&self) -> Content {
        let mut parts = Vec::with_capacity(2);
        if let Some(text) = self.text() {
            parts.push(Part::Text {
                text: text.to_string(),
            });
        }
        if let Some(file) = self.file() {
            parts.push(Part::FileData {
                file_data: file.clone(),
            });
        }
        Content {
            role: self.role(),
            parts,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    FileData {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

#[derive(Debug, Serialize)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
}

impl GenerateContentRequest {
    pub fn from_turns(turns: &[Turn]) -> Self {
        Self {
            contents: turns.iter().map(Turn::to_content).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text parts of the first candidate, if any are non-blank.
    pub fn reply_text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

#[derive(Debug, Deserialize)]
pub struct UploadFileResponse {
    pub file: UploadedFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}
