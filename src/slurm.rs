//! Job description, script generation, and scheduler submission

/// Deserialise a YAML job description into a set of structs defined here
pub mod job_config;

/// Assemble the job directory and generate its lifecycle scripts
pub mod job;

/// Dispatch generated scripts to the scheduler via sbatch/srun
pub mod submit;
